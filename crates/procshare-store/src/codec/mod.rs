//! Binary layout of the shared data file.
//!
//! ```text
//! +----------------------+  0x00
//! | StoreHeader (32 B)   |
//! +----------------------+  0x20
//! | slot 0               |
//! | slot 1               |
//! | ...                  |
//! | slot capacity-1      |
//! +----------------------+  0x20 + capacity * slot_size
//! ```
//!
//! All integers are little-endian. Occupied slots always form a prefix of
//! the slot table whose length is the header's entry count.
//!
//! Everything here is pure: functions take and return byte slices, so the
//! layout can be tested without a file or a lock.

pub mod header;
pub mod slot;
pub mod value;

pub use header::{
    ENTRY_COUNT_OFFSET, Geometry, HEADER_SIZE, SCHEMA_VERSION, STORE_MAGIC, StoreHeader,
    TOKEN_OFFSET,
};
pub use slot::{
    SLOT_HEADER_SIZE, SlotState, check_fits, decode_prefix, decode_slot, encode_slot, max_payload,
};
pub use value::{Entry, Value, ValueType};
