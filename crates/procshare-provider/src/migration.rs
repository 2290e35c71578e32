//! One-time import from the previous single-process storage format.
//!
//! The older IPC file kept the login user id at a fixed position:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 44   | Magic, process count, process ids |
//! | 44     | 44   | Modification counters |
//! | 88     | 4    | Separator |
//! | 92     | 2    | Session id length |
//! | 94     | 40   | Session id |
//! | 134    | 2    | User id length (big-endian) |
//! | 136    | ..   | User id bytes (at most 4000) |

use std::path::{Path, PathBuf};

use procshare_store::{Entry, Value};

use crate::provider::keys;

/// Offset of the user id length field.
pub const LEGACY_USER_ID_OFFSET: usize = 134;

/// Largest user id the legacy format can hold.
pub const LEGACY_USER_ID_MAX: usize = 4000;

/// Location of the IPC file relative to the application files directory.
pub const LEGACY_IPC_RELATIVE_PATH: &str = ".gio.dir/gio.ipc.1";

/// Decode the login user id from the contents of a legacy IPC file.
///
/// Returns `None` when no id is stored, the length field is out of range,
/// the file is truncated, or the bytes are not UTF-8.
pub fn decode_legacy_ipc(bytes: &[u8]) -> Option<Entry> {
    let len_bytes = bytes.get(LEGACY_USER_ID_OFFSET..LEGACY_USER_ID_OFFSET + 2)?;
    let len = i16::from_be_bytes([len_bytes[0], len_bytes[1]]);
    let len = usize::try_from(len).ok()?;
    if len == 0 || len > LEGACY_USER_ID_MAX {
        return None;
    }
    let start = LEGACY_USER_ID_OFFSET + 2;
    let raw = bytes.get(start..start + len)?;
    let user_id = std::str::from_utf8(raw).ok()?;
    Some(Entry::new(
        keys::LOGIN_USER_ID,
        Value::String(user_id.to_string()),
    ))
}

/// Data found in the previous storage format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacySources {
    /// Device id from the old preferences, if any.
    pub device_id: Option<String>,
    /// Path of the old IPC file, if any.
    pub ipc_file: Option<PathBuf>,
}

impl LegacySources {
    /// Sources from the application files directory `files_dir`.
    ///
    /// The IPC file is only referenced when it exists.
    pub fn in_dir(files_dir: &Path) -> Self {
        let ipc = files_dir.join(LEGACY_IPC_RELATIVE_PATH);
        Self {
            device_id: None,
            ipc_file: ipc.is_file().then_some(ipc),
        }
    }

    /// Attach a device id read from the old preferences.
    #[must_use]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Read and decode the legacy user id, if an IPC file is known.
    pub fn read_user_id(&self) -> std::io::Result<Option<Entry>> {
        match &self.ipc_file {
            Some(path) => Ok(decode_legacy_ipc(&std::fs::read(path)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ipc_with_user(user: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; LEGACY_USER_ID_OFFSET];
        bytes.extend_from_slice(&u16::try_from(user.len()).expect("len").to_be_bytes());
        bytes.extend_from_slice(user);
        bytes.resize(LEGACY_USER_ID_OFFSET + 2 + LEGACY_USER_ID_MAX, 0);
        bytes
    }

    #[test]
    fn test_decodes_user_id() {
        let entry = decode_legacy_ipc(&ipc_with_user(b"user-42")).expect("entry");
        assert_eq!(entry.key, keys::LOGIN_USER_ID);
        assert_eq!(entry.value, Value::String("user-42".to_string()));
    }

    #[test]
    fn test_empty_or_truncated_yield_none() {
        assert_eq!(decode_legacy_ipc(&ipc_with_user(b"")), None);
        assert_eq!(decode_legacy_ipc(&[0u8; 100]), None);

        let mut truncated = ipc_with_user(b"abcdef");
        truncated.truncate(LEGACY_USER_ID_OFFSET + 4);
        assert_eq!(decode_legacy_ipc(&truncated), None);
    }

    #[test]
    fn test_out_of_range_length() {
        let mut bytes = ipc_with_user(b"x");
        bytes[LEGACY_USER_ID_OFFSET..LEGACY_USER_ID_OFFSET + 2]
            .copy_from_slice(&4001u16.to_be_bytes());
        assert_eq!(decode_legacy_ipc(&bytes), None);

        bytes[LEGACY_USER_ID_OFFSET..LEGACY_USER_ID_OFFSET + 2]
            .copy_from_slice(&0xFFFFu16.to_be_bytes());
        assert_eq!(decode_legacy_ipc(&bytes), None);
    }

    #[test]
    fn test_sources_in_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(LegacySources::in_dir(dir.path()).ipc_file, None);

        let ipc = dir.path().join(LEGACY_IPC_RELATIVE_PATH);
        std::fs::create_dir_all(ipc.parent().expect("parent")).expect("mkdir");
        std::fs::write(&ipc, ipc_with_user(b"legacy")).expect("write");

        let sources = LegacySources::in_dir(dir.path()).with_device_id("dev");
        assert_eq!(sources.device_id.as_deref(), Some("dev"));
        let entry = sources.read_user_id().expect("read").expect("entry");
        assert_eq!(entry.value, Value::String("legacy".to_string()));
    }

    proptest! {
        #[test]
        fn prop_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = decode_legacy_ipc(&bytes);
        }
    }
}
