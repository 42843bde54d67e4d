//! Supervisor sequencing.
//!
//! Parses are done by the time this runs: create and populate the cgroup,
//! fork the bwrap child and the limiter, wait, tear down, summarize. The
//! teardown path is registered once and reached from three places (normal
//! exit, SIGTERM/SIGINT, fatal error) and is idempotent because
//! `kill_and_remove` gates on the directory existing.

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Instant;

use rustix::io::Errno;
use tracing::{debug, warn};

use crate::cgroup;
use crate::config::Config;
use crate::error::last_errno;
use crate::limiter::Thresholds;
use crate::spawn;
use crate::Result;

/// Published before the cgroup is created so the exit handler and the
/// signal handlers tear down the same path the normal path does.
static CLEANUP_PATH: OnceLock<PathBuf> = OnceLock::new();

fn cleanup_cgroup() {
    if let Some(path) = CLEANUP_PATH.get() {
        // Best effort: a failure here leaves the directory for the next
        // --cgroup-overwrite run, and this can run in handler context.
        let _ = cgroup::kill_and_remove(path);
    }
}

extern "C" fn cleanup_on_exit() {
    cleanup_cgroup();
}

extern "C" fn cleanup_on_signal(_signal: libc::c_int) {
    cleanup_cgroup();
}

/// Run bwrap under the parsed configuration. Returns the process exit
/// status bwrapbox should propagate.
pub fn run(config: Config) -> Result<i32> {
    let Some(cgroup_path) = config.cgroup.clone() else {
        // No cgroup: rlimits and id switches apply in-process, no fork.
        spawn::prepare_exec(&config)?;
        return Err(spawn::exec_bwrap(&config.bwrap_argv));
    };

    if config.cgroup_overwrite {
        cgroup::kill_and_remove(&cgroup_path)?;
    }

    CLEANUP_PATH.set(cgroup_path.clone()).ok();
    // SAFETY: registering an extern "C" handler with no captured state.
    if unsafe { libc::atexit(cleanup_on_exit) } != 0 {
        warn!("atexit registration failed; cleanup relies on the normal path");
    }

    cgroup::create(&cgroup_path)?;
    cgroup::apply_limits(&cgroup_path, &config.cgroup_limits)?;

    let child = spawn::spawn_bwrap(&config, &cgroup_path)?;
    let baseline = Instant::now();

    let thresholds = Thresholds {
        cpu_high: config.cpu_high_usecs,
        cpu_max: config.cpu_max_usecs,
        wall_high: config.wall_high_usecs,
        wall_max: config.wall_max_usecs,
    };
    if thresholds.any() {
        spawn::spawn_limiter(&thresholds, &cgroup_path, child, baseline)?;
    }

    install_signal_handlers();

    let outcome = wait_child(child);
    // cpu.stat must be read before the directory goes away.
    let cpu_usecs = cgroup::cpu_usage_usecs(&cgroup_path).unwrap_or(0);
    let elapsed_usecs = baseline.elapsed().as_micros() as u64;

    cleanup_cgroup();
    reap_stragglers();

    if !config.quiet {
        writeln!(
            io::stderr(),
            "{}",
            summary_line(outcome, elapsed_usecs, cpu_usecs)
        )
        .ok();
    }

    Ok(outcome.exit_status())
}

/// SIGTERM/SIGINT tear the cgroup down (killing both children) and
/// return; SA_RESTART keeps the in-flight waitpid blocking across the
/// handler, so the killed child is still reaped on the normal path and
/// the summary still prints.
fn install_signal_handlers() {
    // SAFETY: the handler only reads the OnceLock'd path.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = cleanup_on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(i32),
    Killed(i32),
    Stopped(i32),
    /// Unexpected waitpid failure.
    Interrupted,
}

impl WaitOutcome {
    pub fn exit_status(self) -> i32 {
        match self {
            WaitOutcome::Exited(code) => code,
            WaitOutcome::Killed(signal) | WaitOutcome::Stopped(signal) => signal,
            WaitOutcome::Interrupted => 130,
        }
    }
}

/// Wait for the bwrap child, exactly once.
fn wait_child(pid: libc::pid_t) -> WaitOutcome {
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: status is a valid out-pointer.
        let ret = unsafe { libc::waitpid(pid, &mut status, libc::WUNTRACED) };
        if ret == pid {
            break;
        }
        if ret < 0 && last_errno() == Errno::INTR {
            continue;
        }
        warn!(errno = %last_errno(), "waitpid failed");
        return WaitOutcome::Interrupted;
    }
    if libc::WIFEXITED(status) {
        WaitOutcome::Exited(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        WaitOutcome::Killed(libc::WTERMSIG(status))
    } else if libc::WIFSTOPPED(status) {
        WaitOutcome::Stopped(libc::WSTOPSIG(status))
    } else {
        WaitOutcome::Interrupted
    }
}

/// The limiter is killed by cgroup teardown rather than waited on; sweep
/// any zombie without blocking.
fn reap_stragglers() {
    // SAFETY: WNOHANG wait on any child; an error just ends the sweep.
    while unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) } > 0 {}
    debug!("reaped remaining children");
}

fn summary_line(outcome: WaitOutcome, elapsed_usecs: u64, cpu_usecs: u64) -> String {
    if outcome == WaitOutcome::Killed(libc::SIGXCPU) {
        return format!(
            "[bwrapbox] application time exceeded after {elapsed_usecs} real usecs and {cpu_usecs} CPU usecs"
        );
    }
    let (reason, status) = match outcome {
        WaitOutcome::Exited(code) => ("exited", code),
        WaitOutcome::Killed(signal) => ("killed", signal),
        WaitOutcome::Stopped(signal) => ("stopped", signal),
        WaitOutcome::Interrupted => ("interrupted", 130),
    };
    format!(
        "[bwrapbox] application {reason} with status {status} after {elapsed_usecs} real usecs and {cpu_usecs} CPU usecs"
    )
}
