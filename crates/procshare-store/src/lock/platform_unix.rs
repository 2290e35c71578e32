//! Unix advisory locking using `flock(2)`.
//!
//! `flock` locks belong to the open file description, so two handles that
//! opened the lock file separately contend with each other even inside one
//! process, while the kernel drops the lock when the last descriptor closes,
//! including on abnormal process exit.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

use libc::{EAGAIN, EINTR, EWOULDBLOCK, LOCK_EX, LOCK_NB, LOCK_UN, flock};

#[allow(unsafe_code)]
fn flock_raw(file: &File, operation: libc::c_int) -> io::Result<()> {
    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { flock(file.as_raw_fd(), operation) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Block until an exclusive lock is held.
///
/// Interrupted waits are resumed; any other failure is returned.
pub fn lock_exclusive(file: &File) -> io::Result<()> {
    loop {
        match flock_raw(file, LOCK_EX) {
            Err(e) if e.raw_os_error() == Some(EINTR) => {}
            other => return other,
        }
    }
}

/// Attempt an exclusive lock without blocking.
///
/// Returns `Ok(false)` when another open file description holds the lock.
pub fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    loop {
        match flock_raw(file, LOCK_EX | LOCK_NB) {
            Ok(()) => return Ok(true),
            Err(e) => match e.raw_os_error() {
                Some(EINTR) => {}
                Some(code) if code == EWOULDBLOCK || code == EAGAIN => return Ok(false),
                _ => return Err(e),
            },
        }
    }
}

/// Release a lock held through `file`.
pub fn unlock(file: &File) -> io::Result<()> {
    flock_raw(file, LOCK_UN)
}
