//! Configuration for a shared store

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Result, StoreError};

/// Default maximum number of distinct keys.
pub const DEFAULT_CAPACITY: u32 = 50;

/// Default slot size in bytes.
pub const DEFAULT_SLOT_SIZE: u32 = 1024;

/// Largest accepted capacity.
pub const MAX_CAPACITY: u32 = 65_535;

/// Smallest accepted slot size.
pub const MIN_SLOT_SIZE: u32 = 64;

/// Largest accepted slot size.
pub const MAX_SLOT_SIZE: u32 = 65_536;

/// Configuration for a shared store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharerConfig {
    /// Directory holding the data file and the lock file
    pub dir: PathBuf,

    /// Store name, used to derive `<name>.shared` and `<name>.lock`
    pub name: String,

    /// Maximum number of distinct keys
    pub capacity: u32,

    /// Size of one slot in bytes (header, key and value)
    pub slot_size: u32,

    /// Flush written ranges to disk after every write
    pub sync_writes: bool,
}

impl Default for SharerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
            name: "shared".to_string(),
            capacity: DEFAULT_CAPACITY,
            slot_size: DEFAULT_SLOT_SIZE,
            sync_writes: false,
        }
    }
}

impl SharerConfig {
    /// Create a new configuration for the named store in `dir`
    pub fn new<P: AsRef<Path>>(dir: P, name: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        serde_json::from_slice(&raw).map_err(|e| {
            StoreError::InvalidConfig(format!("{}: {e}", path.as_ref().display()))
        })
    }

    /// Set the storage directory
    #[must_use]
    pub fn with_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the maximum number of distinct keys
    #[must_use]
    pub const fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the slot size in bytes
    #[must_use]
    pub const fn with_slot_size(mut self, slot_size: u32) -> Self {
        self.slot_size = slot_size;
        self
    }

    /// Enable or disable flushing after every write
    #[must_use]
    pub const fn with_sync_writes(mut self, enable: bool) -> Self {
        self.sync_writes = enable;
        self
    }

    /// Path of the shared data file
    pub fn data_path(&self) -> PathBuf {
        crate::data_file_path(&self.dir, &self.name)
    }

    /// Path of the lock file
    pub fn lock_path(&self) -> PathBuf {
        crate::lock_file_path(&self.dir, &self.name)
    }

    /// Check the configuration for values the file format cannot hold
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidConfig("store name is empty".to_string()));
        }
        if self.name.contains(['/', '\\', '\0']) || self.name == "." || self.name == ".." {
            return Err(StoreError::InvalidConfig(format!(
                "store name must be a plain file name: {:?}",
                self.name
            )));
        }
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(StoreError::InvalidConfig(format!(
                "capacity must be in 1..={MAX_CAPACITY}, got {}",
                self.capacity
            )));
        }
        if !(MIN_SLOT_SIZE..=MAX_SLOT_SIZE).contains(&self.slot_size) || self.slot_size % 8 != 0 {
            return Err(StoreError::InvalidConfig(format!(
                "slot size must be a multiple of 8 in {MIN_SLOT_SIZE}..={MAX_SLOT_SIZE}, got {}",
                self.slot_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SharerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_paths() {
        let config = SharerConfig::new("/data/app", "PersistentSharerDataProvider");
        assert_eq!(
            config.data_path(),
            Path::new("/data/app/PersistentSharerDataProvider.shared")
        );
        assert_eq!(
            config.lock_path(),
            Path::new("/data/app/PersistentSharerDataProvider.lock")
        );
    }

    #[test]
    fn test_rejects_bad_names() {
        for name in ["", "  ", "a/b", "a\\b", ".."] {
            let config = SharerConfig::new("/tmp", name);
            assert!(config.validate().is_err(), "name {name:?} accepted");
        }
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let base = SharerConfig::new("/tmp", "s");
        assert!(base.clone().with_capacity(0).validate().is_err());
        assert!(base.clone().with_capacity(MAX_CAPACITY + 1).validate().is_err());
        assert!(base.clone().with_slot_size(32).validate().is_err());
        assert!(base.clone().with_slot_size(100).validate().is_err());
        assert!(base.with_slot_size(128).validate().is_ok());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, br#"{"name": "ids", "capacity": 8}"#).expect("write");

        let config = SharerConfig::from_json_file(&path).expect("load");
        assert_eq!(config.name, "ids");
        assert_eq!(config.capacity, 8);
        assert_eq!(config.slot_size, DEFAULT_SLOT_SIZE);

        std::fs::write(&path, b"{not json").expect("write");
        assert!(matches!(
            SharerConfig::from_json_file(&path),
            Err(StoreError::InvalidConfig(_))
        ));
    }
}
