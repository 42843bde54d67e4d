//! Crate-wide error type.
//!
//! Everything fatal funnels into [`Error`]; `main` prints it and exits 255,
//! while failures inside a forked child print and `_exit(255)` so the
//! parent's exit handlers never run in the child.

use std::io;
use std::path::PathBuf;

use rustix::io::Errno;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Parse(String),

    #[error("{op} {path}: {source}", path = .path.display())]
    Fs {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("fork: {0}")]
    Fork(Errno),

    #[error("exec bwrap: {0}")]
    Exec(Errno),

    #[error("prctl(PR_SET_PDEATHSIG): {0}")]
    Pdeathsig(Errno),

    #[error("{call} {resource}: {errno}")]
    Rlimit {
        call: &'static str,
        resource: String,
        errno: Errno,
    },

    #[error("set{what}({id}): {errno}")]
    SwitchId {
        what: &'static str,
        id: u32,
        errno: Errno,
    },
}

#[inline]
pub fn last_errno() -> Errno {
    // SAFETY: __errno_location always returns a valid thread-local pointer.
    Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}
