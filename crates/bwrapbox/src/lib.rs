//! # bwrapbox
//!
//! Supervisor that runs `bwrap` (Bubblewrap) under Linux kernel resource
//! constraints:
//!
//! - per-process rlimits (`--rlimit RESOURCE.high|max VALUE`)
//! - a cgroup v2 control group with arbitrary controller limits
//!   (`--cgroup NAME --climit VAR VALUE`)
//! - CPU-time and wall-clock watchdogs that escalate from `SIGXCPU` to
//!   `SIGKILL` (`--climit time.high|time.max`, `--climit-elapsed-high|max`)
//!
//! The sandboxing itself (namespaces, mounts) is bwrap's job; bwrapbox only
//! supervises. Unknown command-line options are forwarded to bwrap verbatim.

pub mod cgroup;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod limiter;
pub mod rlimit;
pub mod spawn;
pub mod supervisor;

pub use config::Config;
pub use error::Error;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, Error>;
