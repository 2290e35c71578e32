//! Memory-mapped shared data file.
//!
//! A [`Region`] maps the whole data file read-write. The entry count and
//! the modification token are read and written through atomics placed
//! directly on the mapping, so a reader can tell whether anything changed
//! without taking the process lock. Everything else (slot contents,
//! creation, repair) must happen while the caller holds the lock.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info, warn};

use crate::codec::{
    ENTRY_COUNT_OFFSET, Entry, Geometry, HEADER_SIZE, StoreHeader, TOKEN_OFFSET, Value,
    decode_prefix, encode_slot,
};
use crate::{Result, StoreError};

/// How [`Region::open`] found the data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The file did not exist or was empty and has been initialized.
    Created,
    /// A valid file was mapped as-is.
    Opened,
    /// The file was invalid and has been reset to an empty store.
    Reinitialized(String),
}

/// The mapped data file.
#[derive(Debug)]
pub struct Region {
    path: PathBuf,
    file: File,
    map: MmapMut,
    /// Geometry of the mapped store (from the file header).
    geometry: Geometry,
    /// Geometry used when the file has to be (re)initialized.
    wanted: Geometry,
    sync_writes: bool,
}

/// Token for a freshly initialized store.
///
/// Strictly greater than `previous` unless it wrapped, and time-derived so
/// that a deleted and recreated file does not reuse small token values.
fn fresh_token(previous: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    previous.wrapping_add(1).max(now)
}

#[allow(unsafe_code)]
fn map_file(file: &File, len: u64) -> Result<MmapMut> {
    let len = usize::try_from(len)
        .map_err(|_| StoreError::InvalidConfig(format!("data file too large to map: {len}")))?;
    // SAFETY: the file is opened read-write and is at least `len` bytes long.
    // Other processes may modify the mapping concurrently; all shared
    // mutation happens under the process lock except the header atomics.
    let map = unsafe { MmapOptions::new().len(len).map_mut(file)? };
    Ok(map)
}

impl Region {
    /// Open or create the data file at `path`.
    ///
    /// The caller must hold the store's process lock. A valid existing file
    /// keeps its own geometry; `wanted` is only used to create or repair.
    /// Repair never shrinks the file.
    pub fn open(path: &Path, wanted: Geometry, sync_writes: bool) -> Result<(Self, OpenOutcome)> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let file_len = file.metadata()?.len();

        if file_len == 0 {
            file.set_len(wanted.file_size())?;
            let map = map_file(&file, wanted.file_size())?;
            let mut region = Self {
                path: path.to_path_buf(),
                file,
                map,
                geometry: wanted,
                wanted,
                sync_writes,
            };
            region.write_empty_header(fresh_token(0))?;
            info!(
                "created shared data file {} ({} slots x {} bytes)",
                path.display(),
                wanted.capacity,
                wanted.slot_size
            );
            return Ok((region, OpenOutcome::Created));
        }

        let header_check = if file_len < HEADER_SIZE as u64 {
            Err(format!("file too short for header: {file_len} bytes"))
        } else {
            let mut raw = [0u8; HEADER_SIZE];
            std::io::Read::read_exact(&mut &file, &mut raw)?;
            StoreHeader::from_bytes(&raw)
                .map_err(|e| e.to_string())
                .and_then(|h| h.validate(file_len).map(|()| h))
        };

        match header_check {
            Ok(header) => {
                let geometry = header.geometry();
                if geometry != wanted {
                    warn!(
                        "{} keeps its geometry {}x{} over configured {}x{}",
                        path.display(),
                        geometry.capacity,
                        geometry.slot_size,
                        wanted.capacity,
                        wanted.slot_size
                    );
                }
                let map = map_file(&file, file_len)?;
                let region = Self {
                    path: path.to_path_buf(),
                    file,
                    map,
                    geometry,
                    wanted,
                    sync_writes,
                };
                Ok((region, OpenOutcome::Opened))
            }
            Err(reason) => {
                let new_len = file_len.max(wanted.file_size());
                if new_len > file_len {
                    file.set_len(new_len)?;
                }
                let map = map_file(&file, new_len)?;
                let mut region = Self {
                    path: path.to_path_buf(),
                    file,
                    map,
                    geometry: wanted,
                    wanted,
                    sync_writes,
                };
                region.reinitialize(&reason)?;
                Ok((region, OpenOutcome::Reinitialized(reason)))
            }
        }
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Geometry of the mapped store.
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Length of the current mapping in bytes.
    pub fn mapped_len(&self) -> usize {
        self.map.len()
    }

    #[allow(unsafe_code)]
    fn token_atomic(&self) -> &AtomicU64 {
        // SAFETY: the mapping is page aligned and at least HEADER_SIZE bytes,
        // so TOKEN_OFFSET (8) is in bounds and 8-byte aligned. The reference
        // cannot outlive `self`, which owns the mapping.
        unsafe { AtomicU64::from_ptr(self.map.as_ptr().add(TOKEN_OFFSET).cast::<u64>().cast_mut()) }
    }

    #[allow(unsafe_code)]
    fn entry_count_atomic(&self) -> &AtomicU32 {
        // SAFETY: ENTRY_COUNT_OFFSET (4) is in bounds and 4-byte aligned.
        unsafe {
            AtomicU32::from_ptr(
                self.map
                    .as_ptr()
                    .add(ENTRY_COUNT_OFFSET)
                    .cast::<u32>()
                    .cast_mut(),
            )
        }
    }

    /// Current modification token. Lock-free.
    pub fn token(&self) -> u64 {
        u64::from_le(self.token_atomic().load(Ordering::Acquire))
    }

    /// Current entry count. Lock-free.
    pub fn entry_count(&self) -> u32 {
        u32::from_le(self.entry_count_atomic().load(Ordering::Acquire))
    }

    /// Token and entry count together, as used for cache validation.
    pub fn stamp(&self) -> (u64, u32) {
        (self.token(), self.entry_count())
    }

    /// Advance the modification token; returns the new value.
    pub fn bump_token(&mut self) -> Result<u64> {
        let next = self.token().wrapping_add(1);
        self.token_atomic().store(next.to_le(), Ordering::Release);
        self.flush_header()?;
        Ok(next)
    }

    /// Publish a new entry count.
    pub fn set_entry_count(&mut self, count: u32) -> Result<()> {
        self.entry_count_atomic()
            .store(count.to_le(), Ordering::Release);
        self.flush_header()
    }

    /// Raw bytes of slot `index`.
    pub fn slot(&self, index: u32) -> &[u8] {
        let start = self.geometry.slot_offset(index);
        &self.map[start..start + self.geometry.slot_size as usize]
    }

    /// Encode `key` and `value` into slot `index`.
    pub fn write_slot(&mut self, index: u32, key: &str, value: &Value) -> Result<()> {
        if index >= self.geometry.capacity {
            return Err(StoreError::CapacityExceeded {
                key: key.to_string(),
                capacity: self.geometry.capacity,
            });
        }
        let start = self.geometry.slot_offset(index);
        let len = self.geometry.slot_size as usize;
        encode_slot(key, value, &mut self.map[start..start + len])?;
        if self.sync_writes {
            self.map.flush_range(start, len)?;
        }
        Ok(())
    }

    /// Parse the header (caller holds the lock).
    pub fn header(&self) -> Result<StoreHeader> {
        StoreHeader::from_bytes(&self.map[..HEADER_SIZE])
    }

    /// Decode the occupied slot prefix.
    ///
    /// Fails with a reason when any slot in the prefix is empty, corrupt, or
    /// repeats an earlier key.
    pub fn load_entries(&self) -> std::result::Result<Vec<Entry>, String> {
        decode_prefix(&self.map, self.geometry, self.entry_count())
    }

    /// Validate the file under the lock and return its entries.
    ///
    /// Follows geometry changes made by other processes by remapping, and
    /// resets the store when the file is invalid. The second element is the
    /// repair reason, if a repair happened.
    pub fn load_validated(&mut self) -> Result<(Vec<Entry>, Option<String>)> {
        let file_len = self.file.metadata()?.len();
        if file_len < self.map.len() as u64 {
            let reason = format!(
                "file shrank from {} to {file_len} bytes",
                self.map.len()
            );
            self.reinitialize(&reason)?;
            return Ok((Vec::new(), Some(reason)));
        }

        let checked = self
            .header()
            .map_err(|e| e.to_string())
            .and_then(|h| h.validate(file_len).map(|()| h));
        let header = match checked {
            Ok(header) => header,
            Err(reason) => {
                self.reinitialize(&reason)?;
                return Ok((Vec::new(), Some(reason)));
            }
        };

        if header.geometry() != self.geometry || file_len > self.map.len() as u64 {
            debug!(
                "remapping {} after external change ({} bytes)",
                self.path.display(),
                file_len
            );
            self.map = map_file(&self.file, file_len)?;
            self.geometry = header.geometry();
        }

        match self.load_entries() {
            Ok(entries) => Ok((entries, None)),
            Err(reason) => {
                self.reinitialize(&reason)?;
                Ok((Vec::new(), Some(reason)))
            }
        }
    }

    /// Reset to an empty store with the configured geometry.
    ///
    /// The caller must hold the lock. The file is grown when needed but never
    /// shrunk. The new token differs from every token other processes may
    /// have cached.
    pub fn reinitialize(&mut self, reason: &str) -> Result<()> {
        warn!(
            "reinitializing shared data file {}: {reason}",
            self.path.display()
        );
        // Restore the file length before touching the mapping.
        let file_len = self.file.metadata()?.len();
        let new_len = file_len
            .max(self.map.len() as u64)
            .max(self.wanted.file_size());
        if new_len > file_len {
            self.file.set_len(new_len)?;
        }
        if new_len > self.map.len() as u64 {
            self.map = map_file(&self.file, new_len)?;
        }
        let previous = self.token();
        self.geometry = self.wanted;

        self.map[HEADER_SIZE..].fill(0);
        self.write_empty_header(fresh_token(previous))?;
        if self.sync_writes {
            self.map.flush()?;
        }
        Ok(())
    }

    fn write_empty_header(&mut self, token: u64) -> Result<()> {
        let header = StoreHeader::new(self.geometry, token);
        let bytes = header.to_bytes()?;
        self.map[..HEADER_SIZE].copy_from_slice(&bytes);
        self.flush_header()
    }

    fn flush_header(&self) -> Result<()> {
        if self.sync_writes {
            self.map.flush_range(0, HEADER_SIZE)?;
        }
        Ok(())
    }
}
