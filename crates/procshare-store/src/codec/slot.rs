//! Slot encoding.
//!
//! Each slot starts with a 24-byte header followed by the key bytes and the
//! value bytes. The rest of the slot is zero.
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 2    | Key length (0 = empty slot) |
//! | 0x02   | 1    | Value type tag |
//! | 0x03   | 1    | Reserved |
//! | 0x04   | 2    | Value length |
//! | 0x06   | 2    | Reserved |
//! | 0x08   | 16   | MD5 of key, tag and value |

use std::io::Cursor;

use binrw::{BinRead, BinWrite};

use super::header::Geometry;
use super::value::{Entry, Value, ValueType};
use crate::{Result, StoreError};

/// Slot header size in bytes.
pub const SLOT_HEADER_SIZE: usize = 24;

/// Fixed header at the start of every slot.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct SlotHeader {
    /// Key length in bytes, zero for an empty slot.
    pub key_len: u16,
    /// Value type tag.
    pub tag: u8,
    /// Reserved, zero.
    pub reserved0: u8,
    /// Value length in bytes.
    pub value_len: u16,
    /// Reserved, zero.
    pub reserved1: u16,
    /// MD5 over key, tag and value bytes.
    pub checksum: [u8; 16],
}

/// Decoded state of one slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    /// Unused slot.
    Empty,
    /// Valid entry.
    Occupied(Entry),
    /// Slot content failed validation.
    Corrupt(String),
}

/// Largest key plus value payload a slot of `slot_size` bytes can hold.
pub const fn max_payload(slot_size: u32) -> usize {
    (slot_size as usize).saturating_sub(SLOT_HEADER_SIZE)
}

fn checksum(key: &[u8], tag: u8, value: &[u8]) -> [u8; 16] {
    let mut data = Vec::with_capacity(key.len() + 1 + value.len());
    data.extend_from_slice(key);
    data.push(tag);
    data.extend_from_slice(value);
    md5::compute(&data).0
}

/// Check that `key` and `value` fit into a slot of `slot_size` bytes.
pub fn check_fits(key: &str, value: &Value, slot_size: u32) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    let size = key.len() + value.encoded_len();
    let max = max_payload(slot_size);
    let max_field = usize::from(u16::MAX);
    if size > max || key.len() > max_field || value.encoded_len() > max_field {
        return Err(StoreError::ValueTooLarge {
            key: key.to_string(),
            size,
            max,
        });
    }
    Ok(())
}

/// Encode an entry into `slot`, zeroing the unused tail.
pub fn encode_slot(key: &str, value: &Value, slot: &mut [u8]) -> Result<()> {
    let slot_size = u32::try_from(slot.len()).unwrap_or(u32::MAX);
    check_fits(key, value, slot_size)?;

    let mut value_bytes = Vec::with_capacity(value.encoded_len());
    value.encode_into(&mut value_bytes);

    let tag = value.value_type().tag();
    let header = SlotHeader {
        // Lengths checked by check_fits.
        key_len: u16::try_from(key.len()).unwrap_or(u16::MAX),
        tag,
        reserved0: 0,
        value_len: u16::try_from(value_bytes.len()).unwrap_or(u16::MAX),
        reserved1: 0,
        checksum: checksum(key.as_bytes(), tag, &value_bytes),
    };

    header
        .write(&mut Cursor::new(&mut slot[..SLOT_HEADER_SIZE]))
        .map_err(|e| StoreError::Corruption(format!("slot serialization error: {e}")))?;

    let key_end = SLOT_HEADER_SIZE + key.len();
    let value_end = key_end + value_bytes.len();
    slot[SLOT_HEADER_SIZE..key_end].copy_from_slice(key.as_bytes());
    slot[key_end..value_end].copy_from_slice(&value_bytes);
    slot[value_end..].fill(0);
    Ok(())
}

/// Decode one slot.
pub fn decode_slot(slot: &[u8]) -> SlotState {
    if slot.len() < SLOT_HEADER_SIZE {
        return SlotState::Corrupt(format!("slot truncated: {} bytes", slot.len()));
    }
    let header = match SlotHeader::read(&mut Cursor::new(&slot[..SLOT_HEADER_SIZE])) {
        Ok(h) => h,
        Err(e) => return SlotState::Corrupt(format!("slot header: {e}")),
    };
    if header.key_len == 0 {
        return SlotState::Empty;
    }

    let key_end = SLOT_HEADER_SIZE + usize::from(header.key_len);
    let value_end = key_end + usize::from(header.value_len);
    if value_end > slot.len() {
        return SlotState::Corrupt(format!(
            "lengths overflow slot: key {} value {}",
            header.key_len, header.value_len
        ));
    }

    let key_bytes = &slot[SLOT_HEADER_SIZE..key_end];
    let value_bytes = &slot[key_end..value_end];
    if checksum(key_bytes, header.tag, value_bytes) != header.checksum {
        return SlotState::Corrupt("checksum mismatch".to_string());
    }

    let Some(ty) = ValueType::from_tag(header.tag) else {
        return SlotState::Corrupt(format!("unknown type tag {}", header.tag));
    };
    let Ok(key) = std::str::from_utf8(key_bytes) else {
        return SlotState::Corrupt("key is not UTF-8".to_string());
    };
    match Value::decode(ty, value_bytes) {
        Some(value) => SlotState::Occupied(Entry::new(key, value)),
        None => SlotState::Corrupt(format!("malformed {ty} value")),
    }
}

/// Decode the first `count` slots of a whole file image.
///
/// Fails with a reason when any slot in the prefix is missing, empty,
/// corrupt, or repeats an earlier key.
pub fn decode_prefix(
    image: &[u8],
    geometry: Geometry,
    count: u32,
) -> std::result::Result<Vec<Entry>, String> {
    if count > geometry.capacity {
        return Err(format!(
            "entry count {count} exceeds capacity {}",
            geometry.capacity
        ));
    }
    let mut entries: Vec<Entry> = Vec::with_capacity(count as usize);
    for index in 0..count {
        let start = geometry.slot_offset(index);
        let Some(slot) = image.get(start..start + geometry.slot_size as usize) else {
            return Err(format!("slot {index}: beyond end of file"));
        };
        match decode_slot(slot) {
            SlotState::Occupied(entry) => {
                if entries.iter().any(|e| e.key == entry.key) {
                    return Err(format!("slot {index}: duplicate key {:?}", entry.key));
                }
                entries.push(entry);
            }
            SlotState::Empty => return Err(format!("slot {index}: empty inside prefix")),
            SlotState::Corrupt(reason) => return Err(format!("slot {index}: {reason}")),
        }
    }
    Ok(entries)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_slot() {
        assert_eq!(decode_slot(&[0u8; 64]), SlotState::Empty);
    }

    #[test]
    fn test_encode_layout() {
        let mut slot = [0xAAu8; 64];
        encode_slot("ab", &Value::Int(7), &mut slot).unwrap();

        assert_eq!(&slot[0..2], &2u16.to_le_bytes());
        assert_eq!(slot[2], ValueType::Int.tag());
        assert_eq!(&slot[4..6], &4u16.to_le_bytes());
        assert_eq!(&slot[24..26], b"ab");
        assert_eq!(&slot[26..30], &7i32.to_le_bytes());
        assert!(slot[30..].iter().all(|b| *b == 0));

        assert_eq!(
            decode_slot(&slot),
            SlotState::Occupied(Entry::new("ab", Value::Int(7)))
        );
    }

    #[test]
    fn test_detects_flipped_byte() {
        let mut slot = [0u8; 64];
        encode_slot("key", &Value::Long(99), &mut slot).unwrap();
        slot[SLOT_HEADER_SIZE + 4] ^= 0x01;
        assert!(matches!(decode_slot(&slot), SlotState::Corrupt(_)));
    }

    #[test]
    fn test_detects_overflowing_lengths() {
        let mut slot = [0u8; 64];
        slot[0..2].copy_from_slice(&60u16.to_le_bytes());
        slot[4..6].copy_from_slice(&60u16.to_le_bytes());
        assert!(matches!(decode_slot(&slot), SlotState::Corrupt(_)));
    }

    #[test]
    fn test_check_fits() {
        assert!(check_fits("k", &Value::String("x".repeat(39)), 64).is_ok());
        assert!(matches!(
            check_fits("k", &Value::String("x".repeat(40)), 64),
            Err(StoreError::ValueTooLarge { size: 41, max: 40, .. })
        ));
        assert!(matches!(
            check_fits("", &Value::Int(0), 64),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_decode_prefix() {
        let geometry = Geometry::new(3, 64);
        let mut image = vec![0u8; usize::try_from(geometry.file_size()).unwrap()];
        let first = geometry.slot_offset(0);
        let second = geometry.slot_offset(1);
        encode_slot("a", &Value::Int(1), &mut image[first..first + 64]).unwrap();
        encode_slot("b", &Value::Boolean(true), &mut image[second..second + 64]).unwrap();

        assert_eq!(
            decode_prefix(&image, geometry, 2).unwrap(),
            vec![
                Entry::new("a", Value::Int(1)),
                Entry::new("b", Value::Boolean(true))
            ]
        );
        assert!(decode_prefix(&image, geometry, 3).unwrap_err().contains("empty"));
        assert!(decode_prefix(&image, geometry, 4).is_err());
        assert!(decode_prefix(&image[..second], geometry, 2).unwrap_err().contains("beyond"));

        encode_slot("a", &Value::Int(2), &mut image[second..second + 64]).unwrap();
        assert!(decode_prefix(&image, geometry, 2).unwrap_err().contains("duplicate"));
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i32>().prop_map(Value::Int),
            any::<i64>().prop_map(Value::Long),
            any::<bool>().prop_map(Value::Boolean),
            "[a-zA-Z0-9 ]{0,60}".prop_map(Value::String),
            proptest::collection::vec(any::<i32>(), 0..10).prop_map(Value::IntArray),
        ]
    }

    proptest! {
        #[test]
        fn prop_slot_holds_any_fitting_entry(key in "[a-z_]{1,20}", value in value_strategy()) {
            let mut slot = vec![0u8; 128];
            encode_slot(&key, &value, &mut slot).unwrap();
            prop_assert_eq!(decode_slot(&slot), SlotState::Occupied(Entry::new(key, value)));
        }
    }
}
