//! Process liveness checks for the alive-process registry.

/// Outcome of registering the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// No other registered process is alive.
    First,
    /// At least one other registered process is still running.
    Joined,
}

/// Tells whether a process id belongs to a running process.
pub trait ProcessProbe {
    /// Whether `pid` is alive.
    fn is_alive(&self, pid: i32) -> bool;

    /// Id of the calling process.
    fn current_pid(&self) -> i32 {
        i32::try_from(std::process::id()).unwrap_or(i32::MAX)
    }
}

/// Probe backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessProbe;

#[cfg(unix)]
impl ProcessProbe for SystemProcessProbe {
    #[allow(unsafe_code)]
    fn is_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 performs only the existence and permission check.
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(not(unix))]
impl ProcessProbe for SystemProcessProbe {
    fn is_alive(&self, pid: i32) -> bool {
        // Without a portable probe only the current process is known alive.
        pid == self.current_pid()
    }
}
