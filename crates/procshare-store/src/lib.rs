//! Cross-process persistent key-value store for cooperating processes.
//!
//! Several OS processes of the same application share a small set of named
//! scalar values (identifiers, flags, monotonically increasing counters)
//! through one memory-mapped data file. Writers serialize on an advisory
//! lock file; readers keep an in-process cache that is invalidated whenever
//! the modification token in the file header changes.
//!
//! - **[`ProcessLock`]**: advisory inter-process mutex on a lock file. The
//!   OS drops the lock when the holder dies, so a killed process can never
//!   block the others forever.
//! - **[`codec`]**: pure encode/decode of the header and the fixed slot table.
//! - **[`region`]**: the mapped data file, with lock-free token reads.
//! - **[`DataSharer`]**: typed get/put, atomic get-and-increment, caching.
//!
//! # Example
//!
//! ```rust,no_run
//! use procshare_store::{DataSharer, SharerConfig};
//!
//! # fn example() -> procshare_store::Result<()> {
//! let config = SharerConfig::new("/tmp/app-data", "counters").with_capacity(16);
//! let sharer = DataSharer::open(config)?;
//!
//! sharer.put_string("device_id", "abc")?;
//! assert_eq!(sharer.get_string("device_id", ""), "abc");
//!
//! let first = sharer.get_and_increment("launches", 1)?;
//! let second = sharer.get_and_increment("launches", 1)?;
//! assert_eq!(second, first + 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use thiserror::Error;

// Binary layout of the shared data file
pub mod codec;

// Configuration
pub mod config;

// Inter-process advisory lock
pub mod lock;

// Memory-mapped data file
pub mod region;

// Store API with in-process cache
pub mod sharer;

pub use codec::{Entry, Value, ValueType};
pub use config::SharerConfig;
pub use lock::{ProcessLock, ProcessLockGuard};
pub use sharer::{DataSharer, SharerState, SharerStats};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// Lock and capacity errors are recoverable and meant for the immediate
/// caller. Corruption of the data file is repaired internally and only
/// reaches callers through diagnostic APIs.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration rejected by validation.
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// Key is empty or otherwise unusable.
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    /// The lock file could not be opened or locked.
    #[error("Lock unavailable: {0}")]
    LockUnavailable(String),

    /// Timed lock acquisition expired.
    #[error("Lock timed out after {millis}ms: {path}")]
    LockTimeout {
        /// Lock file path.
        path: String,
        /// Timeout that expired.
        millis: u64,
    },

    /// Inserting a new key into a full store.
    #[error("Capacity exceeded: cannot insert {key:?}, store holds {capacity} keys")]
    CapacityExceeded {
        /// Rejected key.
        key: String,
        /// Store capacity.
        capacity: u32,
    },

    /// Key plus value does not fit into one slot.
    #[error("Value too large for {key:?}: {size} bytes, slot allows {max}")]
    ValueTooLarge {
        /// Rejected key.
        key: String,
        /// Encoded key and value size in bytes.
        size: usize,
        /// Maximum payload per slot.
        max: usize,
    },

    /// Data corruption detected.
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// Counter arithmetic would overflow.
    #[error("Counter overflow for {key:?}")]
    CounterOverflow {
        /// Counter key.
        key: String,
    },
}

/// Version information for the store.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Extension of the shared data file (`<name>.shared`).
pub const DATA_FILE_EXTENSION: &str = "shared";

/// Extension of the lock file (`<name>.lock`).
pub const LOCK_FILE_EXTENSION: &str = "lock";

/// Derive the data file path for a store.
pub fn data_file_path(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    dir.join(format!("{name}.{DATA_FILE_EXTENSION}"))
}

/// Derive the lock file path for a store.
pub fn lock_file_path(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    dir.join(format!("{name}.{LOCK_FILE_EXTENSION}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_file_paths() {
        let dir = Path::new("/data/app");
        assert_eq!(data_file_path(dir, "store"), Path::new("/data/app/store.shared"));
        assert_eq!(lock_file_path(dir, "store"), Path::new("/data/app/store.lock"));
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::CapacityExceeded {
            key: "login_user_id".to_string(),
            capacity: 2,
        };
        assert_eq!(
            err.to_string(),
            "Capacity exceeded: cannot insert \"login_user_id\", store holds 2 keys"
        );
    }
}
