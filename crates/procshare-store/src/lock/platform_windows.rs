//! Windows advisory locking using `LockFileEx`.
//!
//! The whole lock file range is locked exclusively. Windows drops byte-range
//! locks when the owning handle is closed or the process terminates.

use std::fs::File;
use std::io;
use std::os::windows::io::AsRawHandle;

use winapi::shared::minwindef::DWORD;
use winapi::shared::winerror::ERROR_LOCK_VIOLATION;
use winapi::um::fileapi::{LockFileEx, UnlockFileEx};
use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, OVERLAPPED};
use winapi::um::winnt::HANDLE;

#[allow(unsafe_code)]
fn lock_file_ex(file: &File, flags: DWORD) -> io::Result<()> {
    // SAFETY: the handle is owned by `file`; OVERLAPPED is zeroed, which
    // selects offset 0 for a synchronous call.
    let ok = unsafe {
        let mut overlapped: OVERLAPPED = std::mem::zeroed();
        LockFileEx(
            file.as_raw_handle() as HANDLE,
            flags,
            0,
            DWORD::MAX,
            DWORD::MAX,
            &raw mut overlapped,
        )
    };
    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Block until an exclusive lock is held.
pub fn lock_exclusive(file: &File) -> io::Result<()> {
    lock_file_ex(file, LOCKFILE_EXCLUSIVE_LOCK)
}

/// Attempt an exclusive lock without blocking.
pub fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    match lock_file_ex(file, LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY) {
        Ok(()) => Ok(true),
        Err(e) if e.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Release a lock held through `file`.
#[allow(unsafe_code)]
pub fn unlock(file: &File) -> io::Result<()> {
    // SAFETY: same handle and range as the lock call.
    let ok = unsafe {
        let mut overlapped: OVERLAPPED = std::mem::zeroed();
        UnlockFileEx(
            file.as_raw_handle() as HANDLE,
            0,
            DWORD::MAX,
            DWORD::MAX,
            &raw mut overlapped,
        )
    };
    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
