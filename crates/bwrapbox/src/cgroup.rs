//! cgroup v2 controller.
//!
//! Operates on one directory under the unified hierarchy: create it, write
//! limit controls, migrate a pid in, read `cpu.stat`, and tear it down via
//! `cgroup.kill` (kernel >= 5.14) once membership drains.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::fsutil;
use crate::Result;

pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Absolute names are kept; relative names live under `/sys/fs/cgroup`.
pub fn resolve(name: &str) -> PathBuf {
    if name.starts_with('/') {
        PathBuf::from(name)
    } else {
        Path::new(CGROUP_ROOT).join(name)
    }
}

pub fn create(path: &Path) -> Result<()> {
    debug!(cgroup = %path.display(), "creating cgroup");
    fsutil::create_dir(path)
}

/// Write each `(control, value)` pair to `path/<control>`, in order.
/// A partially configured cgroup is fine to leave behind on error; the
/// exit handler tears the directory down.
pub fn apply_limits(path: &Path, limits: &[(String, i64)]) -> Result<()> {
    for (control, value) in limits {
        debug!(control = %control, value, "writing cgroup limit");
        fsutil::write_file(&path.join(control), value.to_string().as_bytes())?;
    }
    Ok(())
}

/// Migrate the calling process into the cgroup. Called from the bwrap
/// child with its own pid just before exec, so the execed process and all
/// of its descendants are accounted.
pub fn attach_self(path: &Path) -> Result<()> {
    // SAFETY: getpid has no failure modes.
    let pid = unsafe { libc::getpid() };
    fsutil::write_file(&path.join("cgroup.procs"), format!("{pid}\n").as_bytes())
}

/// Cumulative CPU usage of the cgroup, or `None` once the directory is
/// gone (the workload exited and teardown already ran).
pub fn cpu_usage_usecs(path: &Path) -> Option<u64> {
    let stat = fsutil::read_file(&path.join("cpu.stat")).ok()?;
    parse_usage_usec(&String::from_utf8_lossy(&stat))
}

/// `usage_usec` may move between kernel versions; accept it on any line.
fn parse_usage_usec(stat: &str) -> Option<u64> {
    for line in stat.lines() {
        let mut fields = line.split_ascii_whitespace();
        if fields.next() == Some("usage_usec") {
            return fields.next()?.parse().ok();
        }
    }
    None
}

/// Kill every member and remove the directory. Gated on the directory
/// existing, which makes the exit handler, the signal handlers, and the
/// `--cgroup-overwrite` pre-teardown all idempotent.
///
/// Removal is only legal once `cgroup.procs` reads empty. Membership
/// drains within microseconds of `cgroup.kill`, and each poll is itself a
/// syscall, so there is no sleep between reads.
pub fn kill_and_remove(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Ok(());
    }
    debug!(cgroup = %path.display(), "killing cgroup members");
    fsutil::write_file(&path.join("cgroup.kill"), b"1")?;

    let procs = path.join("cgroup.procs");
    loop {
        match fsutil::read_file(&procs) {
            Ok(buf) if !buf.iter().all(u8::is_ascii_whitespace) => continue,
            // Empty, or the file vanished underneath us: drained either way.
            _ => break,
        }
    }

    debug!(cgroup = %path.display(), "removing cgroup");
    fsutil::remove_dir(path)
}
