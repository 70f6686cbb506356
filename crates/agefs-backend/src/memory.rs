//! Embedded in-memory backend driver.
//!
//! Keeps the whole namespace in a table behind one lock. Used for fake
//! runs that exercise the engine without touching a disk, and as the
//! hermetic backend in tests. Content is never stored; only lengths are
//! tracked, matching how the tool treats file data (preallocated zeros).

use crate::{BackendDriver, BackendFd, FileStatus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Namespace {
    files: HashMap<PathBuf, u64>,
    dirs: HashSet<PathBuf>,
    handles: HashMap<u64, PathBuf>,
}

/// Driver backed by an in-memory namespace.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    next_fd: AtomicU64,
    state: Mutex<Namespace>,
}

impl MemoryDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live files in the namespace.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    /// Number of directories in the namespace.
    #[must_use]
    pub fn dir_count(&self) -> usize {
        self.state.lock().dirs.len()
    }

    /// Sum of all file lengths.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().files.values().sum()
    }
}

fn not_found() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "no such path")
}

impl BackendDriver for MemoryDriver {
    fn open(&self, path: &Path, create: bool) -> io::Result<BackendFd> {
        let mut state = self.state.lock();
        if !state.files.contains_key(path) {
            if !create {
                return Err(not_found());
            }
            state.files.insert(path.to_owned(), 0);
        }
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        state.handles.insert(fd, path.to_owned());
        Ok(BackendFd(fd))
    }

    fn close(&self, fd: BackendFd) -> io::Result<()> {
        self.state
            .lock()
            .handles
            .remove(&fd.0)
            .map(drop)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown backend fd"))
    }

    fn write(&self, fd: BackendFd, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        let path = state.handles.get(&fd.0).cloned().ok_or_else(not_found)?;
        let len = state.files.get_mut(&path).ok_or_else(not_found)?;
        *len += buf.len() as u64;
        Ok(buf.len())
    }

    fn access(&self, path: &Path) -> io::Result<()> {
        let state = self.state.lock();
        if state.files.contains_key(path) || state.dirs.contains(path) {
            Ok(())
        } else {
            Err(not_found())
        }
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        self.state
            .lock()
            .files
            .remove(path)
            .map(drop)
            .ok_or_else(not_found)
    }

    fn mkdir(&self, path: &Path, _mode: u32) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.dirs.contains(path) || state.files.contains_key(path) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "path exists"));
        }
        state.dirs.insert(path.to_owned());
        Ok(())
    }

    fn fallocate(&self, fd: BackendFd, offset: u64, len: u64) -> io::Result<()> {
        let mut state = self.state.lock();
        let path = state.handles.get(&fd.0).cloned().ok_or_else(not_found)?;
        let current = state.files.get_mut(&path).ok_or_else(not_found)?;
        *current = (*current).max(offset + len);
        Ok(())
    }

    fn stat(&self, path: &Path) -> io::Result<FileStatus> {
        let state = self.state.lock();
        if let Some(&len) = state.files.get(path) {
            Ok(FileStatus { len, is_dir: false })
        } else if state.dirs.contains(path) {
            Ok(FileStatus {
                len: 0,
                is_dir: true,
            })
        } else {
            Err(not_found())
        }
    }

    fn chmod(&self, path: &Path, _mode: u32) -> io::Result<()> {
        self.access(path)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
