//! Shared identifiers and event sequence ids for cooperating processes.
//!
//! [`PersistentDataProvider`] puts a fixed key namespace on top of a
//! [`procshare_store::DataSharer`]: device, session and login-user
//! identifiers, activity bookkeeping, the alive-process registry used to
//! detect the first process of an application, and [`EventSequenceId`]
//! generation from two independent counters.
//!
//! ```rust,no_run
//! use procshare_provider::PersistentDataProvider;
//!
//! # fn example() -> procshare_provider::Result<()> {
//! let provider = PersistentDataProvider::open("/tmp/app-data")?;
//! provider.set_device_id("device-1")?;
//!
//! let first = provider.get_and_increment("VISIT")?;
//! let second = provider.get_and_increment("CUSTOM")?;
//! assert!(second.global_id > first.global_id);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use thiserror::Error;

pub mod migration;
pub mod process;
pub mod provider;
pub mod sequence;

pub use migration::{LegacySources, decode_legacy_ipc};
pub use process::{ProcessProbe, ProcessRole, SystemProcessProbe};
pub use provider::PersistentDataProvider;
pub use sequence::EventSequenceId;

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur in provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Error from the underlying store.
    #[error(transparent)]
    Store(#[from] procshare_store::StoreError),

    /// I/O error outside the store (legacy files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller input rejected.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
