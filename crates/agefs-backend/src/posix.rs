//! POSIX backend driver.
//!
//! Binds the capability set to `std::fs`. Preallocation grows the file
//! with `set_len` and touches one byte per 4096-byte block, which forces
//! block allocation on filesystems without a native fallocate fast path
//! and leaves the content zeroed either way.

use crate::{BackendDriver, BackendFd, FileStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const TOUCH_BLOCK: u64 = 4096;

/// Driver backed by the local filesystem.
#[derive(Debug, Default)]
pub struct PosixDriver {
    next_fd: AtomicU64,
    open_files: Mutex<HashMap<u64, File>>,
}

impl PosixDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_file<T>(
        &self,
        fd: BackendFd,
        f: impl FnOnce(&File) -> io::Result<T>,
    ) -> io::Result<T> {
        let files = self.open_files.lock();
        let file = files
            .get(&fd.0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown backend fd"))?;
        f(file)
    }
}

impl BackendDriver for PosixDriver {
    fn open(&self, path: &Path, create: bool) -> io::Result<BackendFd> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)?;
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.open_files.lock().insert(fd, file);
        Ok(BackendFd(fd))
    }

    fn close(&self, fd: BackendFd) -> io::Result<()> {
        self.open_files
            .lock()
            .remove(&fd.0)
            .map(drop)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown backend fd"))
    }

    fn write(&self, fd: BackendFd, buf: &[u8]) -> io::Result<usize> {
        let mut files = self.open_files.lock();
        let file = files
            .get_mut(&fd.0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown backend fd"))?;
        io::Write::write(file, buf)
    }

    fn access(&self, path: &Path) -> io::Result<()> {
        std::fs::metadata(path).map(drop)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        std::fs::create_dir(path)?;
        std::fs::set_permissions(path, Permissions::from_mode(mode))
    }

    fn fallocate(&self, fd: BackendFd, offset: u64, len: u64) -> io::Result<()> {
        self.with_file(fd, |file| {
            let new_len = offset + len;
            let current = file.metadata()?.len();
            if current >= new_len {
                // Not growing the file; nothing to allocate.
                return Ok(());
            }
            file.set_len(new_len)?;
            let mut ptr = current.div_ceil(TOUCH_BLOCK) * TOUCH_BLOCK;
            while ptr < new_len {
                let written = file.write_at(&[0], ptr)?;
                if written == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "short write while touching preallocated blocks",
                    ));
                }
                ptr += TOUCH_BLOCK;
            }
            Ok(())
        })
    }

    fn stat(&self, path: &Path) -> io::Result<FileStatus> {
        let meta = std::fs::metadata(path)?;
        Ok(FileStatus {
            len: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        std::fs::set_permissions(path, Permissions::from_mode(mode))
    }

    fn name(&self) -> &'static str {
        "posix"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_stat_unlink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("42");
        let driver = PosixDriver::new();

        let fd = driver.open(&path, true).expect("open");
        driver.fallocate(fd, 0, 8192).expect("fallocate");
        driver.close(fd).expect("close");

        let status = driver.stat(&path).expect("stat");
        assert_eq!(status.len, 8192);
        assert!(!status.is_dir);

        // Preallocated content is all zeros.
        let content = std::fs::read(&path).expect("read");
        assert!(content.iter().all(|&b| b == 0));

        driver.unlink(&path).expect("unlink");
        assert!(driver.access(&path).is_err());
    }

    #[test]
    fn fallocate_does_not_shrink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("keep");
        let driver = PosixDriver::new();

        let fd = driver.open(&path, true).expect("open");
        driver.fallocate(fd, 0, 4096).expect("grow");
        driver.fallocate(fd, 0, 1024).expect("no-op");
        driver.close(fd).expect("close");

        assert_eq!(driver.stat(&path).expect("stat").len, 4096);
    }

    #[test]
    fn mkdir_sets_directory_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("d1");
        let driver = PosixDriver::new();
        driver.mkdir(&path, 0o750).expect("mkdir");
        let mode = std::fs::metadata(&path).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[test]
    fn close_twice_reports_unknown_fd() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("x");
        let driver = PosixDriver::new();
        let fd = driver.open(&path, true).expect("open");
        driver.close(fd).expect("first close");
        assert!(driver.close(fd).is_err());
    }
}
