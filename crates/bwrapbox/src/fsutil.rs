//! Small-file helpers for cgroup pseudo-files.
//!
//! Everything the supervisor touches on cgroupfs is at most a few KiB;
//! these wrappers exist to keep the operation + path + errno context that
//! the fatal-error path prints.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Read;
use std::io::Write as _;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;

use crate::error::Error;
use crate::Result;

fn fs_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Error + 'a {
    move |source| Error::Fs {
        op,
        path: path.to_owned(),
        source,
    }
}

pub fn create_dir(path: &Path) -> Result<()> {
    DirBuilder::new()
        .mode(0o775)
        .create(path)
        .map_err(fs_err("mkdir", path))
}

pub fn remove_dir(path: &Path) -> Result<()> {
    fs::remove_dir(path).map_err(fs_err("rmdir", path))
}

/// Create-or-truncate `path` (mode 0664) and write all of `contents`.
/// Short writes are retried by `write_all`; the fd closes on every path.
pub fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o664)
        .open(path)
        .map_err(fs_err("open", path))?;
    file.write_all(contents).map_err(fs_err("write", path))
}

/// Read `path` to EOF into a growable buffer.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut file = fs::File::open(path).map_err(fs_err("open", path))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(fs_err("read", path))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control");
        write_file(&path, b"1048576").unwrap();
        assert_eq!(read_file(&path).unwrap(), b"1048576");
    }

    #[test]
    fn write_truncates_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control");
        write_file(&path, b"some longer value").unwrap();
        write_file(&path, b"7").unwrap();
        assert_eq!(read_file(&path).unwrap(), b"7");
    }

    #[test]
    fn create_and_remove_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub");
        create_dir(&path).unwrap();
        assert!(path.is_dir());
        remove_dir(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn read_missing_file_reports_open() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_file(&dir.path().join("absent")).unwrap_err();
        assert!(err.to_string().starts_with("open "));
    }
}
