#![forbid(unsafe_code)]
//! Backend I/O layer.
//!
//! All filesystem aging I/O is routed through the [`BackendDriver`]
//! capability trait so the aging engine can target filesystems that are
//! not reached through the kernel's POSIX surface. Two drivers ship:
//!
//! - **[`PosixDriver`]**: the default, backed by `std::fs`.
//! - **[`MemoryDriver`]**: an embedded in-memory namespace used for fake
//!   and hermetic runs.
//!
//! The `issue_*` helpers compose driver capabilities into the three
//! operations the engine dispatches (create, access, delete) and carry
//! the retry semantics: preallocation retries forever with a one-second
//! backoff, existence probes retry on the eventual-consistency error
//! codes, and everything else is fatal. The in-memory bookkeeping in the
//! engine is the source of truth, so helpers run detached on the
//! [`IoPool`] and are never awaited per-call.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::warn;

mod memory;
mod pool;
mod posix;

pub use memory::MemoryDriver;
pub use pool::{IoPool, PoolStats};
pub use posix::PosixDriver;

/// Opaque driver-scoped file handle, in the spirit of a file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendFd(pub u64);

/// Subset of `stat` output the tool consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStatus {
    pub len: u64,
    pub is_dir: bool,
}

/// Capability set routed through by all aging I/O.
///
/// The signatures mirror the POSIX calls the tool needs so a driver can
/// bind them directly. Drivers must be thread-safe: calls are issued from
/// pool workers.
pub trait BackendDriver: Send + Sync {
    /// Open a file, creating it when `create` is set.
    fn open(&self, path: &Path, create: bool) -> io::Result<BackendFd>;
    fn close(&self, fd: BackendFd) -> io::Result<()>;
    fn write(&self, fd: BackendFd, buf: &[u8]) -> io::Result<usize>;
    /// Existence probe (`access(2)` with `F_OK`).
    fn access(&self, path: &Path) -> io::Result<()>;
    fn unlink(&self, path: &Path) -> io::Result<()>;
    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;
    /// Ensure `len` bytes starting at `offset` are allocated and zeroed.
    fn fallocate(&self, fd: BackendFd, offset: u64, len: u64) -> io::Result<()>;
    fn stat(&self, path: &Path) -> io::Result<FileStatus>;
    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;
    /// Driver name for diagnostics and the `--backend` flag.
    fn name(&self) -> &'static str;
}

// ── Issue helpers ───────────────────────────────────────────────────────────

/// Whether an `access` failure is an eventual-consistency code worth
/// retrying rather than a fatal fault.
fn access_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

/// Create `path` and preallocate `len` bytes of zeros.
///
/// Preallocation failures are retried forever with a one-second backoff;
/// open and close failures are fatal. Runs on pool workers, so fatality
/// is a panic.
pub fn issue_create(driver: &dyn BackendDriver, path: &Path, len: u64) {
    let fd = driver.open(path, true).unwrap_or_else(|err| {
        panic!("issue_create: open({}) failed: {err}", path.display());
    });
    if len > 0 {
        loop {
            match driver.fallocate(fd, 0, len) {
                Ok(()) => break,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        len,
                        error = %err,
                        "preallocation failed, retrying"
                    );
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }
    }
    driver.close(fd).unwrap_or_else(|err| {
        panic!("issue_create: close({}) failed: {err}", path.display());
    });
}

/// Existence probe with unbounded retry on the eventual-consistency
/// codes. Any other failure is fatal.
pub fn issue_access(driver: &dyn BackendDriver, path: &Path) {
    loop {
        match driver.access(path) {
            Ok(()) => return,
            Err(err) if access_retryable(&err) => continue,
            Err(err) => {
                panic!("issue_access: access({}) failed: {err}", path.display());
            }
        }
    }
}

/// Wait for `path` to become visible, then unlink it.
pub fn issue_delete(driver: &dyn BackendDriver, path: &Path) {
    issue_access(driver, path);
    driver.unlink(path).unwrap_or_else(|err| {
        panic!("issue_delete: unlink({}) failed: {err}", path.display());
    });
}

/// Make an entire path, `mkdir -p` style, through driver capabilities.
///
/// Intermediate directories get `mode` widened with owner write+search;
/// a component that already exists must be a directory. Mode bits beyond
/// the permission triplet are applied to the final directory with a
/// trailing `chmod`, since `mkdir` alone cannot set them.
pub fn mkdir_path(driver: &dyn BackendDriver, path: &Path, mode: u32) -> io::Result<()> {
    let parent_mode = mode | 0o300;
    let components: Vec<Component<'_>> = path.components().collect();
    let mut current = PathBuf::new();
    let last = components.len().saturating_sub(1);
    for (index, component) in components.iter().enumerate() {
        current.push(component);
        if matches!(component, Component::RootDir | Component::CurDir) {
            continue;
        }
        let this_mode = if index == last { mode } else { parent_mode };
        match driver.mkdir(&current, this_mode) {
            Ok(()) => {}
            Err(err) => {
                let status = driver.stat(&current).map_err(|_| err)?;
                if !status.is_dir {
                    return Err(io::Error::new(
                        io::ErrorKind::NotADirectory,
                        format!("{} exists and is not a directory", current.display()),
                    ));
                }
            }
        }
    }
    if mode & !0o777 != 0 {
        driver.chmod(path, mode)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn mkdir_path_builds_each_level() {
        let driver = MemoryDriver::new();
        mkdir_path(&driver, Path::new("/mnt/d1/d2/d3"), 0o777).expect("mkdir -p");
        for dir in ["/mnt", "/mnt/d1", "/mnt/d1/d2", "/mnt/d1/d2/d3"] {
            let status = driver.stat(Path::new(dir)).expect("stat");
            assert!(status.is_dir, "{dir} should be a directory");
        }
    }

    #[test]
    fn mkdir_path_tolerates_existing_directories() {
        let driver = MemoryDriver::new();
        mkdir_path(&driver, Path::new("/mnt/d1"), 0o777).expect("first");
        mkdir_path(&driver, Path::new("/mnt/d1/d2"), 0o777).expect("second");
        assert!(driver.stat(Path::new("/mnt/d1/d2")).expect("stat").is_dir);
    }

    #[test]
    fn mkdir_path_rejects_file_component() {
        let driver = MemoryDriver::new();
        let fd = driver.open(Path::new("/mnt"), true).expect("open");
        driver.close(fd).expect("close");
        let err = mkdir_path(&driver, Path::new("/mnt/d1"), 0o777).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotADirectory);
    }

    #[test]
    fn issue_create_then_delete_round_trip() {
        let driver = MemoryDriver::new();
        let path = Path::new("/f/100");
        issue_create(&driver, path, 8192);
        assert_eq!(driver.stat(path).expect("stat").len, 8192);
        issue_delete(&driver, path);
        assert!(driver.stat(path).is_err());
    }

    #[test]
    fn pool_executes_all_jobs_before_drop_returns() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = IoPool::new(4);
            for _ in 0..256 {
                let counter = Arc::clone(&counter);
                pool.enqueue(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
        }
        assert_eq!(counter.load(Ordering::Relaxed), 256);
    }
}
