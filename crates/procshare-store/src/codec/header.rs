//! Store header and file geometry.
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 2    | Magic (`0x5350`) |
//! | 0x02   | 2    | Schema version |
//! | 0x04   | 4    | Entry count |
//! | 0x08   | 8    | Modification token |
//! | 0x10   | 4    | Capacity (slot count) |
//! | 0x14   | 4    | Slot size in bytes |
//! | 0x18   | 8    | Reserved (zero) |
//!
//! Entry count and modification token are naturally aligned so that the
//! live file can expose them as atomics.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};

use crate::config::{MAX_CAPACITY, MAX_SLOT_SIZE, MIN_SLOT_SIZE};
use crate::{Result, StoreError};

/// Header size in bytes.
pub const HEADER_SIZE: usize = 0x20;

/// Magic number identifying a store file.
pub const STORE_MAGIC: u16 = 0x5350;

/// Current schema version.
pub const SCHEMA_VERSION: u16 = 1;

/// Byte offset of the entry count (u32).
pub const ENTRY_COUNT_OFFSET: usize = 0x04;

/// Byte offset of the modification token (u64).
pub const TOKEN_OFFSET: usize = 0x08;

/// Slot table shape of a store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Number of slots.
    pub capacity: u32,
    /// Bytes per slot.
    pub slot_size: u32,
}

impl Geometry {
    /// Create a geometry.
    pub const fn new(capacity: u32, slot_size: u32) -> Self {
        Self {
            capacity,
            slot_size,
        }
    }

    /// Total file size: header plus the slot table.
    pub const fn file_size(&self) -> u64 {
        HEADER_SIZE as u64 + self.capacity as u64 * self.slot_size as u64
    }

    /// Byte offset of slot `index`.
    pub const fn slot_offset(&self, index: u32) -> usize {
        HEADER_SIZE + index as usize * self.slot_size as usize
    }

    /// Check that the geometry is one this crate can produce.
    pub const fn is_valid(&self) -> bool {
        self.capacity > 0
            && self.capacity <= MAX_CAPACITY
            && self.slot_size >= MIN_SLOT_SIZE
            && self.slot_size <= MAX_SLOT_SIZE
            && self.slot_size % 8 == 0
    }
}

/// Store file header.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct StoreHeader {
    /// Magic number (must be `STORE_MAGIC`).
    pub magic: u16,
    /// Schema version (must be `SCHEMA_VERSION`).
    pub schema_version: u16,
    /// Number of occupied slots; they form the prefix of the slot table.
    pub entry_count: u32,
    /// Incremented after every successful write.
    pub modification_token: u64,
    /// Number of slots.
    pub capacity: u32,
    /// Bytes per slot.
    pub slot_size: u32,
    /// Reserved, zero.
    pub reserved: [u8; 8],
}

impl StoreHeader {
    /// Create an empty-store header for `geometry`.
    pub const fn new(geometry: Geometry, modification_token: u64) -> Self {
        Self {
            magic: STORE_MAGIC,
            schema_version: SCHEMA_VERSION,
            entry_count: 0,
            modification_token,
            capacity: geometry.capacity,
            slot_size: geometry.slot_size,
            reserved: [0; 8],
        }
    }

    /// Geometry described by this header.
    pub const fn geometry(&self) -> Geometry {
        Geometry::new(self.capacity, self.slot_size)
    }

    /// Serialize the header.
    pub fn to_bytes(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        self.write(&mut Cursor::new(&mut buf[..]))
            .map_err(|e| StoreError::Corruption(format!("header serialization error: {e}")))?;
        Ok(buf)
    }

    /// Parse a header from the start of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(StoreError::Corruption(format!(
                "header truncated: {} < {HEADER_SIZE} bytes",
                data.len()
            )));
        }
        Self::read(&mut Cursor::new(&data[..HEADER_SIZE]))
            .map_err(|e| StoreError::Corruption(format!("header deserialization error: {e}")))
    }

    /// Validate the header against the size of the file it came from.
    pub fn validate(&self, file_len: u64) -> std::result::Result<(), String> {
        if self.magic != STORE_MAGIC {
            return Err(format!("bad magic {:#06x}", self.magic));
        }
        if self.schema_version != SCHEMA_VERSION {
            return Err(format!("unsupported schema version {}", self.schema_version));
        }
        let geometry = self.geometry();
        if !geometry.is_valid() {
            return Err(format!(
                "invalid geometry: capacity {} slot size {}",
                self.capacity, self.slot_size
            ));
        }
        if file_len < geometry.file_size() {
            return Err(format!(
                "file too short: {file_len} < {} bytes",
                geometry.file_size()
            ));
        }
        if self.entry_count > self.capacity {
            return Err(format!(
                "entry count {} exceeds capacity {}",
                self.entry_count, self.capacity
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_field_offsets() {
        let mut header = StoreHeader::new(Geometry::new(50, 1024), 0x1122_3344_5566_7788);
        header.entry_count = 7;
        let bytes = header.to_bytes().unwrap();

        assert_eq!(&bytes[0..2], &STORE_MAGIC.to_le_bytes());
        assert_eq!(&bytes[2..4], &SCHEMA_VERSION.to_le_bytes());
        assert_eq!(&bytes[ENTRY_COUNT_OFFSET..ENTRY_COUNT_OFFSET + 4], &7u32.to_le_bytes());
        assert_eq!(
            &bytes[TOKEN_OFFSET..TOKEN_OFFSET + 8],
            &0x1122_3344_5566_7788u64.to_le_bytes()
        );
        assert_eq!(&bytes[16..20], &50u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &1024u32.to_le_bytes());
        assert_eq!(&bytes[24..32], &[0; 8]);

        assert_eq!(StoreHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_geometry() {
        let g = Geometry::new(2, 64);
        assert_eq!(g.file_size(), 32 + 128);
        assert_eq!(g.slot_offset(0), 32);
        assert_eq!(g.slot_offset(1), 96);
        assert!(g.is_valid());
        assert!(!Geometry::new(0, 64).is_valid());
        assert!(!Geometry::new(1, 60).is_valid());
    }

    #[test]
    fn test_validate() {
        let g = Geometry::new(4, 64);
        let header = StoreHeader::new(g, 1);
        assert!(header.validate(g.file_size()).is_ok());
        assert!(header.validate(g.file_size() - 1).is_err());

        let mut bad = header.clone();
        bad.magic = 0;
        assert!(bad.validate(g.file_size()).unwrap_err().contains("magic"));

        let mut bad = header.clone();
        bad.schema_version = 2;
        assert!(bad.validate(g.file_size()).is_err());

        let mut bad = header;
        bad.entry_count = 5;
        assert!(bad.validate(g.file_size()).is_err());
    }

    #[test]
    fn test_from_bytes_too_small() {
        assert!(StoreHeader::from_bytes(&[0u8; 10]).is_err());
    }
}
