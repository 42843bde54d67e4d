//! Dual-axis (CPU time / wall clock) limiter loop.
//!
//! Runs in its own forked child against the bwrap child's pid. Phase
//! "high" raises `SIGXCPU`, phase "max" raises `SIGKILL`. There is no
//! fixed poll interval: each iteration sleeps the minimum remaining delta
//! across the armed thresholds, so the loop wakes once per boundary.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cgroup;

/// The four watchdog thresholds, in microseconds. `None` = disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Thresholds {
    pub cpu_high: Option<u64>,
    pub cpu_max: Option<u64>,
    pub wall_high: Option<u64>,
    pub wall_max: Option<u64>,
}

impl Thresholds {
    pub fn any(&self) -> bool {
        self.cpu_high.is_some()
            || self.cpu_max.is_some()
            || self.wall_high.is_some()
            || self.wall_max.is_some()
    }

    /// An axis without a high bound borrows its max bound, so the high
    /// phase never outlasts the max phase.
    fn high_phase(&self) -> Option<Phase> {
        if self.cpu_high.is_none() && self.wall_high.is_none() {
            return None;
        }
        Some(Phase {
            cpu: self.cpu_high.or(self.cpu_max),
            wall: self.wall_high.or(self.wall_max),
            signal: libc::SIGXCPU,
        })
    }

    fn max_phase(&self) -> Option<Phase> {
        if self.cpu_max.is_none() && self.wall_max.is_none() {
            return None;
        }
        Some(Phase {
            cpu: self.cpu_max,
            wall: self.wall_max,
            signal: libc::SIGKILL,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Phase {
    cpu: Option<u64>,
    wall: Option<u64>,
    signal: libc::c_int,
}

impl Phase {
    fn crossed(&self, cpu_usecs: u64, wall_usecs: u64) -> bool {
        self.cpu.is_some_and(|t| cpu_usecs >= t) || self.wall.is_some_and(|t| wall_usecs >= t)
    }

    /// Microseconds until the nearest armed bound.
    fn sleep_usecs(&self, cpu_usecs: u64, wall_usecs: u64) -> u64 {
        let cpu = self.cpu.map(|t| t.saturating_sub(cpu_usecs));
        let wall = self.wall.map(|t| t.saturating_sub(wall_usecs));
        match (cpu, wall) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => 0,
        }
    }
}

/// Monitor `target` until both phases complete or the cgroup disappears.
/// `baseline` is seeded by the supervisor right after the bwrap fork, so
/// elapsed time starts at zero for the workload.
pub fn run(thresholds: &Thresholds, cgroup_path: &Path, target: libc::pid_t, baseline: Instant) {
    for phase in [thresholds.high_phase(), thresholds.max_phase()]
        .into_iter()
        .flatten()
    {
        if !watch(&phase, cgroup_path, target, baseline) {
            return;
        }
    }
}

/// Returns false once the cgroup is gone (the workload already exited).
fn watch(phase: &Phase, cgroup_path: &Path, target: libc::pid_t, baseline: Instant) -> bool {
    loop {
        let wall_usecs = baseline.elapsed().as_micros() as u64;
        let Some(cpu_usecs) = cgroup::cpu_usage_usecs(cgroup_path) else {
            return false;
        };
        if phase.crossed(cpu_usecs, wall_usecs) {
            debug!(signal = phase.signal, target, cpu_usecs, wall_usecs, "time limit crossed");
            // SAFETY: plain kill; ESRCH just means the child is already gone.
            unsafe { libc::kill(target, phase.signal) };
            return true;
        }
        std::thread::sleep(Duration::from_micros(phase.sleep_usecs(cpu_usecs, wall_usecs)));
    }
}
