//! Typed store API with an in-process read cache.
//!
//! Every handle mirrors the whole slot table in memory together with the
//! `(modification token, entry count)` stamp it was read at. A read compares
//! that stamp with the live header atomics; only on mismatch does it take
//! the process lock and reload. Writes always run under the process lock,
//! bump the token last, and update the mirror before returning.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{Entry, Geometry, StoreHeader, Value, check_fits, decode_prefix};
use crate::config::SharerConfig;
use crate::lock::ProcessLock;
use crate::region::{OpenOutcome, Region};
use crate::{Result, StoreError};

/// Lifecycle of a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SharerState {
    /// The data file has not been opened yet.
    Uninitialized,
    /// The data file is mapped.
    Initialized,
}

/// Snapshot of store metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharerStats {
    /// Maximum number of distinct keys.
    pub capacity: u32,
    /// Number of stored keys.
    pub entry_count: u32,
    /// Current modification token.
    pub modification_token: u64,
    /// Bytes per slot.
    pub slot_size: u32,
}

/// In-memory mirror of the slot table.
#[derive(Debug, Default)]
struct Cache {
    stamp: Option<(u64, u32)>,
    /// Entries in slot order.
    entries: Vec<Entry>,
    index: HashMap<String, u32>,
}

impl Cache {
    fn rebuild(&mut self, entries: Vec<Entry>, stamp: (u64, u32)) {
        self.index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key.clone(), i as u32))
            .collect();
        self.entries = entries;
        self.stamp = Some(stamp);
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.index
            .get(key)
            .and_then(|&i| self.entries.get(i as usize))
            .map(|e| &e.value)
    }
}

#[derive(Debug, Default)]
struct Inner {
    region: Option<Region>,
    cache: Cache,
}

/// Write `value` under `key` into the region and the mirror.
///
/// Does not bump the token; callers commit once per critical section.
fn upsert(region: &mut Region, cache: &mut Cache, key: &str, value: Value) -> Result<()> {
    let geometry = region.geometry();
    check_fits(key, &value, geometry.slot_size)?;

    if let Some(&index) = cache.index.get(key) {
        region.write_slot(index, key, &value)?;
        if let Some(entry) = cache.entries.get_mut(index as usize) {
            entry.value = value;
        }
        return Ok(());
    }

    let count = region.entry_count();
    if count >= geometry.capacity {
        debug!(
            "rejecting new key {key:?}: store holds {} keys",
            geometry.capacity
        );
        return Err(StoreError::CapacityExceeded {
            key: key.to_string(),
            capacity: geometry.capacity,
        });
    }
    region.write_slot(count, key, &value)?;
    region.set_entry_count(count + 1)?;
    cache.index.insert(key.to_string(), count);
    cache.entries.push(Entry::new(key, value));
    Ok(())
}

/// Publish the writes of a critical section.
fn commit(region: &mut Region, cache: &mut Cache) -> Result<()> {
    region.bump_token()?;
    cache.stamp = Some(region.stamp());
    Ok(())
}

/// Cross-process key-value store.
///
/// Typed getters never fail: an absent key, a stored value of another type,
/// or an I/O problem all yield the caller's default. Writers report lock,
/// capacity and size errors.
///
/// A handle may be shared between threads; calls on one handle are
/// serialized. Separate handles on the same store, in this process or in
/// others, coordinate through the lock file.
#[derive(Debug)]
pub struct DataSharer {
    config: SharerConfig,
    lock: ProcessLock,
    inner: Mutex<Inner>,
}

impl DataSharer {
    /// Create a handle without touching the file system.
    ///
    /// The data file is opened (and created if needed) by the first call
    /// that needs it.
    pub fn new(config: SharerConfig) -> Result<Self> {
        config.validate()?;
        let lock = ProcessLock::new(config.lock_path());
        Ok(Self {
            config,
            lock,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Create a handle and open the data file immediately.
    pub fn open(config: SharerConfig) -> Result<Self> {
        let sharer = Self::new(config)?;
        sharer.initialize()?;
        Ok(sharer)
    }

    /// Open the data file if this handle has not done so yet.
    pub fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.region.is_some() {
            return Ok(());
        }
        let _guard = self.lock.guard()?;
        self.refresh_locked(&mut inner)
    }

    /// Configuration of this handle.
    pub fn config(&self) -> &SharerConfig {
        &self.config
    }

    /// Lifecycle state.
    pub fn state(&self) -> SharerState {
        if self.inner.lock().region.is_some() {
            SharerState::Initialized
        } else {
            SharerState::Uninitialized
        }
    }

    fn wanted_geometry(&self) -> Geometry {
        Geometry::new(self.config.capacity, self.config.slot_size)
    }

    /// Reload the mirror from the file. The process lock must be held.
    fn refresh_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.region.is_none() {
            let (region, outcome) = Region::open(
                &self.config.data_path(),
                self.wanted_geometry(),
                self.config.sync_writes,
            )?;
            match &outcome {
                OpenOutcome::Reinitialized(reason) => {
                    warn!("store {} reset on open: {reason}", self.config.name);
                }
                OpenOutcome::Created | OpenOutcome::Opened => {
                    debug!("store {} ready: {outcome:?}", self.config.name);
                }
            }
            inner.region = Some(region);
        }

        let Inner { region, cache } = inner;
        let region = region
            .as_mut()
            .ok_or_else(|| StoreError::Corruption("data file not mapped".to_string()))?;
        let (entries, repaired) = region.load_validated()?;
        if let Some(reason) = repaired {
            warn!("store {} reset: {reason}", self.config.name);
        }
        cache.rebuild(entries, region.stamp());
        Ok(())
    }

    fn is_fresh(inner: &Inner) -> bool {
        match &inner.region {
            Some(region) => inner.cache.stamp == Some(region.stamp()),
            None => false,
        }
    }

    /// Run `f` against an up-to-date mirror.
    fn read<T>(&self, f: impl FnOnce(&Cache) -> T) -> Result<T> {
        let mut inner = self.inner.lock();
        if !Self::is_fresh(&inner) {
            let _guard = self.lock.guard()?;
            self.refresh_locked(&mut inner)?;
        }
        Ok(f(&inner.cache))
    }

    /// Run `f` under the process lock with an up-to-date mirror.
    fn write<T>(&self, f: impl FnOnce(&mut Region, &mut Cache) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        let _guard = self.lock.guard()?;
        if !Self::is_fresh(&inner) {
            self.refresh_locked(&mut inner)?;
        }
        let Inner { region, cache } = &mut *inner;
        let region = region
            .as_mut()
            .ok_or_else(|| StoreError::Corruption("data file not mapped".to_string()))?;
        f(region, cache)
    }

    fn get_or<T>(&self, key: &str, default: T, pick: impl FnOnce(&Value) -> Option<T>) -> T {
        match self.read(|cache| cache.get(key).and_then(pick)) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                warn!("read of {key:?} failed, using default: {e}");
                default
            }
        }
    }

    /// Get the stored value for `key`, whatever its type.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.read(|cache| cache.get(key).cloned())
    }

    /// Get a string, or `default` if absent or not a string.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get_or(key, default.to_string(), |v| match v {
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    /// Get an `i32`, or `default` if absent or not an int.
    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        self.get_or(key, default, |v| match v {
            Value::Int(n) => Some(*n),
            _ => None,
        })
    }

    /// Get an `i64`, or `default` if absent or not a long.
    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        self.get_or(key, default, |v| match v {
            Value::Long(n) => Some(*n),
            _ => None,
        })
    }

    /// Get an `f32`, or `default` if absent or not a float.
    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        self.get_or(key, default, |v| match v {
            Value::Float(n) => Some(*n),
            _ => None,
        })
    }

    /// Get a boolean, or `default` if absent or not a boolean.
    pub fn get_boolean(&self, key: &str, default: bool) -> bool {
        self.get_or(key, default, |v| match v {
            Value::Boolean(b) => Some(*b),
            _ => None,
        })
    }

    /// Get an int array, or `default` if absent or not an int array.
    pub fn get_int_array(&self, key: &str, default: &[i32]) -> Vec<i32> {
        self.get_or(key, default.to_vec(), |v| match v {
            Value::IntArray(values) => Some(values.clone()),
            _ => None,
        })
    }

    /// Insert or replace `key`.
    pub fn put(&self, key: &str, value: Value) -> Result<()> {
        self.write(|region, cache| {
            upsert(region, cache, key, value)?;
            commit(region, cache)
        })
    }

    /// Store a string.
    pub fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, Value::String(value.to_string()))
    }

    /// Store an `i32`.
    pub fn put_int(&self, key: &str, value: i32) -> Result<()> {
        self.put(key, Value::Int(value))
    }

    /// Store an `i64`.
    pub fn put_long(&self, key: &str, value: i64) -> Result<()> {
        self.put(key, Value::Long(value))
    }

    /// Store an `f32`.
    pub fn put_float(&self, key: &str, value: f32) -> Result<()> {
        self.put(key, Value::Float(value))
    }

    /// Store a boolean.
    pub fn put_boolean(&self, key: &str, value: bool) -> Result<()> {
        self.put(key, Value::Boolean(value))
    }

    /// Store an int array.
    pub fn put_int_array(&self, key: &str, values: &[i32]) -> Result<()> {
        self.put(key, Value::IntArray(values.to_vec()))
    }

    /// Store several strings under one lock acquisition.
    ///
    /// Either every pair is written or none is: sizes and capacity are
    /// checked for the whole batch first. Later pairs win on duplicate keys.
    pub fn put_strings(&self, pairs: &[(&str, &str)]) -> Result<()> {
        self.write(|region, cache| {
            let geometry = region.geometry();
            let mut new_keys = HashSet::new();
            for (key, value) in pairs {
                check_fits(key, &Value::String((*value).to_string()), geometry.slot_size)?;
                if !cache.index.contains_key(*key) && new_keys.insert(*key) {
                    let needed = region.entry_count() as usize + new_keys.len();
                    if needed > geometry.capacity as usize {
                        debug!("rejecting batch at new key {key:?}");
                        return Err(StoreError::CapacityExceeded {
                            key: (*key).to_string(),
                            capacity: geometry.capacity,
                        });
                    }
                }
            }
            for (key, value) in pairs {
                upsert(region, cache, key, Value::String((*value).to_string()))?;
            }
            commit(region, cache)
        })
    }

    /// Add `delta` to a long counter and return the previous value.
    ///
    /// An absent key counts as 0.
    pub fn get_and_increment(&self, key: &str, delta: i64) -> Result<i64> {
        self.get_and_add_long(key, delta, 0)
    }

    /// Add `delta` to a long counter and return the previous value.
    ///
    /// An absent key, or one holding another type, counts as `start` and is
    /// overwritten as a long.
    pub fn get_and_add_long(&self, key: &str, delta: i64, start: i64) -> Result<i64> {
        self.write(|region, cache| {
            let current = match cache.get(key) {
                Some(Value::Long(n)) => *n,
                _ => start,
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| StoreError::CounterOverflow {
                    key: key.to_string(),
                })?;
            upsert(region, cache, key, Value::Long(next))?;
            commit(region, cache)?;
            Ok(current)
        })
    }

    /// Add `delta` to an int counter and return the previous value.
    ///
    /// An absent key, or one holding another type, counts as `start`.
    pub fn get_and_add_int(&self, key: &str, delta: i32, start: i32) -> Result<i32> {
        self.write(|region, cache| {
            let current = match cache.get(key) {
                Some(Value::Int(n)) => *n,
                _ => start,
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| StoreError::CounterOverflow {
                    key: key.to_string(),
                })?;
            upsert(region, cache, key, Value::Int(next))?;
            commit(region, cache)?;
            Ok(current)
        })
    }

    /// Snapshot of all entries in slot order.
    pub fn entries(&self) -> Result<Vec<Entry>> {
        self.read(|cache| cache.entries.clone())
    }

    /// Whether `key` is stored.
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        self.read(|cache| cache.index.contains_key(key))
    }

    /// Store metadata.
    pub fn stats(&self) -> Result<SharerStats> {
        let mut inner = self.inner.lock();
        if !Self::is_fresh(&inner) {
            let _guard = self.lock.guard()?;
            self.refresh_locked(&mut inner)?;
        }
        let region = inner
            .region
            .as_ref()
            .ok_or_else(|| StoreError::Corruption("data file not mapped".to_string()))?;
        let geometry = region.geometry();
        let (modification_token, entry_count) = inner.cache.stamp.unwrap_or(region.stamp());
        Ok(SharerStats {
            capacity: geometry.capacity,
            entry_count,
            modification_token,
            slot_size: geometry.slot_size,
        })
    }

    /// Check the data file without repairing it.
    ///
    /// Reads the file under the process lock and never maps or resets it,
    /// so this works the same on a handle that has not been opened yet. A
    /// missing or empty file is fine. Returns [`StoreError::Corruption`]
    /// describing the first problem found. The regular API repairs such
    /// files on its next reload instead.
    pub fn check_integrity(&self, timeout: Duration) -> Result<()> {
        let _inner = self.inner.lock();
        let _guard = self.lock.try_guard_for(timeout)?;
        let image = match std::fs::read(self.config.data_path()) {
            Ok(image) => image,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if image.is_empty() {
            return Ok(());
        }
        let header = StoreHeader::from_bytes(&image)?;
        header
            .validate(image.len() as u64)
            .map_err(StoreError::Corruption)?;
        decode_prefix(&image, header.geometry(), header.entry_count)
            .map(|_| ())
            .map_err(StoreError::Corruption)
    }
}
