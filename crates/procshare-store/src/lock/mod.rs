//! Advisory inter-process lock built on a dedicated lock file.
//!
//! Every [`ProcessLock`] opens its own descriptor for the lock file, so two
//! handles in one process contend exactly like two processes do. The lock is
//! held by the OS on behalf of the descriptor: when the holder exits or is
//! killed, the kernel releases it and waiters proceed.
//!
//! ## Platform support
//!
//! - Unix: `flock(LOCK_EX)` / `flock(LOCK_EX | LOCK_NB)`
//! - Windows: `LockFileEx` over the full file range

#[cfg(unix)]
pub mod platform_unix;
#[cfg(windows)]
pub mod platform_windows;

#[cfg(unix)]
use platform_unix as platform;
#[cfg(windows)]
use platform_windows as platform;

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{Result, StoreError};

/// Poll interval for timed acquisition in milliseconds.
pub const LOCK_RETRY_MS: u64 = 10;

/// Advisory lock over a named resource shared between processes.
///
/// `lock` blocks in the kernel without spinning; `try_lock` never blocks;
/// `try_lock_for` polls non-blocking attempts until the timeout expires.
/// `release` is a no-op when the lock is not held.
///
/// A handle is not a thread mutex: threads sharing one handle share its
/// lock state. Use one handle per thread, or serialize access externally.
#[derive(Debug)]
pub struct ProcessLock {
    /// Path to the lock file.
    path: PathBuf,
    /// Lock file descriptor, opened on first acquisition and kept open.
    file: Mutex<Option<File>>,
    /// Whether this handle currently holds the lock.
    held: AtomicBool,
}

impl ProcessLock {
    /// Create a lock handle for the given lock file path.
    ///
    /// The file is created on first acquisition, not here.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
            held: AtomicBool::new(false),
        }
    }

    /// Create a lock handle for `<dir>/<name>.lock`.
    pub fn named(dir: &Path, name: &str) -> Self {
        Self::new(crate::lock_file_path(dir, name))
    }

    /// Get the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Block until the lock is held.
    ///
    /// Fails with [`StoreError::LockUnavailable`] if the lock file cannot be
    /// opened or the OS rejects the lock call; it never waits on a failure.
    pub fn lock(&self) -> Result<()> {
        let mut slot = self.file.lock();
        let file = self.open_locked(&mut slot)?;
        platform::lock_exclusive(file).map_err(|e| {
            warn!("lock failed on {}: {e}", self.path.display());
            StoreError::LockUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        self.held.store(true, Ordering::Release);
        Ok(())
    }

    /// Attempt to acquire the lock without blocking.
    ///
    /// Returns `false` when another handle holds the lock or when the lock
    /// file cannot be used at all.
    pub fn try_lock(&self) -> bool {
        let mut slot = self.file.lock();
        match self.try_lock_locked(&mut slot) {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!("try_lock failed on {}: {e}", self.path.display());
                false
            }
        }
    }

    /// Attempt to acquire the lock, waiting up to `timeout`.
    ///
    /// Returns `false` on expiry or when the lock file cannot be used.
    pub fn try_lock_for(&self, timeout: Duration) -> bool {
        let retry_interval = Duration::from_millis(LOCK_RETRY_MS);
        let start = Instant::now();

        loop {
            {
                let mut slot = self.file.lock();
                match self.try_lock_locked(&mut slot) {
                    Ok(true) => return true,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("try_lock_for failed on {}: {e}", self.path.display());
                        return false;
                    }
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                debug!(
                    "lock wait expired after {}ms: {}",
                    timeout.as_millis(),
                    self.path.display()
                );
                return false;
            }
            std::thread::sleep(retry_interval.min(timeout - elapsed));
        }
    }

    /// Attempt to acquire the lock, waiting up to `timeout_millis`.
    pub fn try_lock_millis(&self, timeout_millis: u64) -> bool {
        self.try_lock_for(Duration::from_millis(timeout_millis))
    }

    /// Release the lock.
    ///
    /// Safe to call when the lock is not held.
    pub fn release(&self) {
        let slot = self.file.lock();
        if !self.held.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(file) = slot.as_ref()
            && let Err(e) = platform::unlock(file)
        {
            // The descriptor stays open; closing it would also drop the lock.
            warn!("unlock failed on {}: {e}", self.path.display());
        }
    }

    /// Block until the lock is held and return a guard releasing it on drop.
    pub fn guard(&self) -> Result<ProcessLockGuard<'_>> {
        self.lock()?;
        Ok(ProcessLockGuard { lock: self })
    }

    /// Acquire within `timeout` and return a guard releasing it on drop.
    pub fn try_guard_for(&self, timeout: Duration) -> Result<ProcessLockGuard<'_>> {
        if self.try_lock_for(timeout) {
            Ok(ProcessLockGuard { lock: self })
        } else {
            Err(StoreError::LockTimeout {
                path: self.path.display().to_string(),
                millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }

    fn try_lock_locked(&self, slot: &mut Option<File>) -> Result<bool> {
        let file = self.open_locked(slot)?;
        let acquired = platform::try_lock_exclusive(file)
            .map_err(|e| StoreError::LockUnavailable(format!("{}: {e}", self.path.display())))?;
        if acquired {
            self.held.store(true, Ordering::Release);
        }
        Ok(acquired)
    }

    fn open_locked<'a>(&self, slot: &'a mut Option<File>) -> Result<&'a File> {
        if slot.is_none() {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::LockUnavailable(format!("{}: {e}", parent.display()))
                })?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)
                .map_err(|e| {
                    StoreError::LockUnavailable(format!("{}: {e}", self.path.display()))
                })?;
            *slot = Some(file);
        }
        slot.as_ref()
            .ok_or_else(|| StoreError::LockUnavailable(self.path.display().to_string()))
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// RAII guard for a held [`ProcessLock`].
#[derive(Debug)]
pub struct ProcessLockGuard<'a> {
    lock: &'a ProcessLock,
}

impl Drop for ProcessLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lock_release_repeated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = ProcessLock::named(dir.path(), "repeat");

        for _ in 0..1000 {
            lock.lock().expect("lock");
            assert!(lock.is_held());
            lock.release();
            assert!(!lock.is_held());
        }

        // Nothing left behind: a fresh handle gets the lock immediately.
        let other = ProcessLock::named(dir.path(), "repeat");
        assert!(other.try_lock());
    }

    #[test]
    fn test_release_when_not_held() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = ProcessLock::named(dir.path(), "noop");
        lock.release();
        lock.release();
        assert!(lock.try_lock());
        lock.release();
        lock.release();
    }

    #[test]
    fn test_distinct_handles_contend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = ProcessLock::named(dir.path(), "contend");
        let second = ProcessLock::named(dir.path(), "contend");

        first.lock().expect("lock");
        assert!(!second.try_lock());
        assert!(!second.try_lock_for(Duration::from_millis(50)));

        first.release();
        assert!(second.try_lock());
        assert!(!first.try_lock());
        second.release();
    }

    #[test]
    fn test_chained_sequences_on_one_handle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = ProcessLock::named(dir.path(), "chain");

        lock.lock().expect("lock");
        assert!(lock.try_lock());
        lock.release();
        assert!(lock.try_lock_millis(100));
        lock.lock().expect("relock");
        lock.release();
    }

    #[test]
    fn test_waiter_wakes_after_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let holder = ProcessLock::named(dir.path(), "wake");
        holder.lock().expect("lock");

        let path = holder.path().to_path_buf();
        let waiter = std::thread::spawn(move || {
            let lock = ProcessLock::new(path);
            lock.try_lock_for(Duration::from_secs(5))
        });

        std::thread::sleep(Duration::from_millis(100));
        holder.release();
        assert!(waiter.join().expect("join"));
    }

    #[test]
    fn test_blocking_lock_waits_for_holder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let holder = Arc::new(ProcessLock::named(dir.path(), "block"));
        holder.lock().expect("lock");

        let path = holder.path().to_path_buf();
        let waiter = std::thread::spawn(move || {
            let lock = ProcessLock::new(path);
            let start = Instant::now();
            lock.lock().expect("lock in waiter");
            lock.release();
            start.elapsed()
        });

        std::thread::sleep(Duration::from_millis(150));
        holder.release();
        let waited = waiter.join().expect("join");
        assert!(waited >= Duration::from_millis(100));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = ProcessLock::named(dir.path(), "guard");
        let other = ProcessLock::named(dir.path(), "guard");

        {
            let _guard = lock.guard().expect("guard");
            assert!(!other.try_lock());
            assert!(matches!(
                other.try_guard_for(Duration::from_millis(20)),
                Err(StoreError::LockTimeout { .. })
            ));
        }
        assert!(other.try_lock());
    }

    #[test]
    fn test_unopenable_lock_file_fails_gracefully() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory in place of the lock file cannot be opened for writing.
        let path = dir.path().join("occupied");
        std::fs::create_dir(&path).expect("mkdir");

        let lock = ProcessLock::new(&path);
        assert!(!lock.try_lock());
        assert!(!lock.try_lock_for(Duration::from_millis(20)));
        assert!(matches!(lock.lock(), Err(StoreError::LockUnavailable(_))));
        lock.release();
    }
}
