//! Fork/exec choreography.
//!
//! Two children leave the supervisor: the bwrap child, which migrates
//! itself into the cgroup, applies rlimits, drops ids, and execs; and the
//! limiter child, which joins the cgroup and watches the bwrap child.
//! Both set `PR_SET_PDEATHSIG = SIGKILL` first so a dying supervisor
//! drags them down. Child-side failures write to stderr and `_exit(255)`,
//! never the parent's `exit`, so the parent's exit handlers stay with the
//! parent.

use std::ffi::CString;
use std::io::{self, Write as _};
use std::path::Path;
use std::time::Instant;

use tracing::debug;

use crate::cgroup;
use crate::config::Config;
use crate::error::{last_errno, Error};
use crate::limiter::{self, Thresholds};
use crate::rlimit;
use crate::Result;

pub fn set_pdeathsig() -> Result<()> {
    // SAFETY: integer-only prctl.
    if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL, 0, 0, 0) } != 0 {
        return Err(Error::Pdeathsig(last_errno()));
    }
    Ok(())
}

/// Rlimits plus gid/uid switches, applied in whichever process is about
/// to exec bwrap (the child in cgroup mode, the supervisor otherwise).
pub fn prepare_exec(config: &Config) -> Result<()> {
    rlimit::apply(&config.exec_limits)?;
    switch_ids(config.exec_gid, config.exec_uid)
}

/// gid before uid; each syscall is skipped when the current id already
/// matches the requested one.
fn switch_ids(gid: Option<u32>, uid: Option<u32>) -> Result<()> {
    // SAFETY: getgid/getuid have no failure modes; setgid/setuid report
    // through errno.
    if let Some(gid) = gid {
        if unsafe { libc::getgid() } != gid && unsafe { libc::setgid(gid) } != 0 {
            return Err(Error::SwitchId {
                what: "gid",
                id: gid,
                errno: last_errno(),
            });
        }
    }
    if let Some(uid) = uid {
        if unsafe { libc::getuid() } != uid && unsafe { libc::setuid(uid) } != 0 {
            return Err(Error::SwitchId {
                what: "uid",
                id: uid,
                errno: last_errno(),
            });
        }
    }
    Ok(())
}

/// execvp(3) with a NULL-terminated argv; only returns on failure.
pub fn exec_bwrap(argv: &[CString]) -> Error {
    let argv_ptrs: Vec<*const libc::c_char> = argv
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();
    debug!(argc = argv.len(), "exec bwrap");
    // SAFETY: argv_ptrs is NULL-terminated and argv outlives the call.
    unsafe { libc::execvp(argv_ptrs[0], argv_ptrs.as_ptr()) };
    Error::Exec(last_errno())
}

/// Fork the bwrap child. The child joins the cgroup *before* exec so the
/// execed process and all of its descendants are accounted.
pub fn spawn_bwrap(config: &Config, cgroup_path: &Path) -> Result<libc::pid_t> {
    // SAFETY: the supervisor is single-threaded; fork is safe here.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::Fork(last_errno()));
    }
    if pid == 0 {
        child_fail(bwrap_child(config, cgroup_path));
    }
    debug!(pid, "forked bwrap child");
    Ok(pid)
}

fn bwrap_child(config: &Config, cgroup_path: &Path) -> Error {
    if let Err(err) = set_pdeathsig() {
        return err;
    }
    if let Err(err) = cgroup::attach_self(cgroup_path) {
        return err;
    }
    if let Err(err) = prepare_exec(config) {
        return err;
    }
    exec_bwrap(&config.bwrap_argv)
}

/// Fork the limiter child against the bwrap child's pid. It joins the
/// cgroup too, so `cgroup.kill` during teardown reaps it.
pub fn spawn_limiter(
    thresholds: &Thresholds,
    cgroup_path: &Path,
    target: libc::pid_t,
    baseline: Instant,
) -> Result<libc::pid_t> {
    // SAFETY: see spawn_bwrap.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::Fork(last_errno()));
    }
    if pid == 0 {
        if let Err(err) = set_pdeathsig() {
            child_fail(err);
        }
        if let Err(err) = cgroup::attach_self(cgroup_path) {
            child_fail(err);
        }
        limiter::run(thresholds, cgroup_path, target, baseline);
        // SAFETY: child exit without parent atexit handlers.
        unsafe { libc::_exit(0) }
    }
    debug!(pid, target, "forked time limiter");
    Ok(pid)
}

fn child_fail(err: Error) -> ! {
    writeln!(io::stderr(), "bwrapbox: {err}").ok();
    // SAFETY: _exit, not exit: the parent's exit handlers must not run here.
    unsafe { libc::_exit(255) }
}
