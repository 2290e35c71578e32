//! Domain accessors over the shared store.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use procshare_store::{DataSharer, ProcessLock, SharerConfig, Value};
use tracing::{debug, info, warn};

use crate::migration::LegacySources;
use crate::process::{ProcessProbe, ProcessRole};
use crate::sequence::EventSequenceId;
use crate::{ProviderError, Result};

/// Store name of the provider's data and lock files.
pub const SHARER_NAME: &str = "PersistentSharerDataProvider";

/// Number of keys the provider's store can hold.
pub const SHARER_CAPACITY: u32 = 50;

/// Name of the lock serializing process registration and migration.
pub const PROCESS_LOCK_NAME: &str = "PersistentDataProvider";

/// First value handed out by every sequence counter.
pub const SEQUENCE_START: i64 = 1;

/// Keys used by the provider.
pub mod keys {
    /// Global event sequence counter.
    pub const TYPE_GLOBAL: &str = "TYPE_GLOBAL";
    /// Device identifier.
    pub const DEVICE_ID: &str = "DEVICE_ID";
    /// Current session identifier.
    pub const SESSION_ID: &str = "SESSION_ID";
    /// Logged-in user identifier.
    pub const LOGIN_USER_ID: &str = "LOGIN_USER_ID";
    /// Key type of the logged-in user identifier.
    pub const LOGIN_USER_KEY: &str = "LOGIN_USER_KEY";
    /// Last user id that was not empty.
    pub const LATEST_NON_NULL_USER_ID: &str = "LATEST_NON_NULL_USER_ID";
    /// Time the application was last paused.
    pub const LATEST_PAUSE_TIME: &str = "LATEST_PAUSE_TIME";
    /// Number of foreground activities across processes.
    pub const ACTIVITY_COUNT: &str = "ACTIVITY_COUNT";
    /// Whether a visit is sent after the session id was refreshed.
    pub const SEND_VISIT_AFTER_REFRESH_SESSION_ID: &str = "SEND_VISIT_AFTER_REFRESH_SESSION_ID";
    /// Registered process ids.
    pub const ALIVE_PID: &str = "ALIVE_PID";
    /// `<true|false>::<pid>::<session>` marker for a freshly assigned device id.
    pub const NEW_DEVICE_TOKEN: &str = "NEW_DEVICE_TOKEN";
    /// Set once the legacy import has run.
    pub const KEEP_ID: &str = "KEEP_ID";
    /// Prefix of per-event-type sequence counters.
    pub const SEQUENCE_PREFIX: &str = "SEQ_";

    /// Counter key for `event_type`.
    pub fn sequence_key(event_type: &str) -> String {
        format!("{SEQUENCE_PREFIX}{event_type}")
    }
}

const DISABLED_DEVICE_TOKEN: &str = "false::1::NULL";

/// Named accessors over the shared store.
///
/// Construct one per application process and pass it to whatever needs the
/// shared identifiers.
#[derive(Debug)]
pub struct PersistentDataProvider {
    sharer: DataSharer,
    lock_dir: PathBuf,
    pid: i32,
    first_process: AtomicBool,
}

impl PersistentDataProvider {
    /// Open the provider store in `dir` with the default name and capacity.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::with_config(SharerConfig::new(dir, SHARER_NAME).with_capacity(SHARER_CAPACITY))
    }

    /// Open the provider over a store with an explicit configuration.
    pub fn with_config(config: SharerConfig) -> Result<Self> {
        Ok(Self::from_sharer(DataSharer::open(config)?))
    }

    /// Wrap an existing store handle.
    pub fn from_sharer(sharer: DataSharer) -> Self {
        let lock_dir = sharer.config().dir.clone();
        Self {
            sharer,
            lock_dir,
            pid: i32::try_from(std::process::id()).unwrap_or(i32::MAX),
            first_process: AtomicBool::new(true),
        }
    }

    /// Underlying store.
    pub fn sharer(&self) -> &DataSharer {
        &self.sharer
    }

    /// Lock serializing registration and migration across processes.
    ///
    /// A fresh handle per call, so threads contend like processes do.
    fn process_lock(&self) -> ProcessLock {
        ProcessLock::named(&self.lock_dir, PROCESS_LOCK_NAME)
    }

    /// Reserve the next sequence id for `event_type`.
    pub fn get_and_increment(&self, event_type: &str) -> Result<EventSequenceId> {
        self.get_and_add(event_type, 1)
    }

    /// Reserve `count` consecutive ids of both counters.
    ///
    /// Returns the first reserved id of each. The global and the per-type
    /// counter are advanced in two separate critical sections.
    pub fn get_and_add(&self, event_type: &str, count: i64) -> Result<EventSequenceId> {
        if event_type.is_empty() {
            return Err(ProviderError::InvalidInput(
                "event type must not be empty".to_string(),
            ));
        }
        if count < 1 {
            return Err(ProviderError::InvalidInput(format!(
                "sequence reservation must be positive, got {count}"
            )));
        }
        let global_id = self
            .sharer
            .get_and_add_long(keys::TYPE_GLOBAL, count, SEQUENCE_START)?;
        let event_type_id = self.sharer.get_and_add_long(
            &keys::sequence_key(event_type),
            count,
            SEQUENCE_START,
        )?;
        Ok(EventSequenceId::new(global_id, event_type_id))
    }

    /// Reserve the next global sequence id.
    pub fn global_sequence_and_increment(&self) -> Result<i64> {
        Ok(self
            .sharer
            .get_and_add_long(keys::TYPE_GLOBAL, 1, SEQUENCE_START)?)
    }

    /// Device id, empty if unset.
    pub fn device_id(&self) -> String {
        self.sharer.get_string(keys::DEVICE_ID, "")
    }

    /// Store the device id and mark the device as new.
    ///
    /// Blank ids are ignored.
    pub fn set_device_id(&self, device_id: &str) -> Result<()> {
        if device_id.trim().is_empty() {
            debug!("ignoring blank device id");
            return Ok(());
        }
        self.set_new_device_token(true)?;
        Ok(self.sharer.put_string(keys::DEVICE_ID, device_id)?)
    }

    /// Session id, empty if unset.
    pub fn session_id(&self) -> String {
        self.sharer.get_string(keys::SESSION_ID, "")
    }

    /// Store the session id.
    pub fn set_session_id(&self, session_id: &str) -> Result<()> {
        Ok(self.sharer.put_string(keys::SESSION_ID, session_id)?)
    }

    /// Replace the session id with a new random one and return it.
    pub fn refresh_session(&self) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.set_session_id(&session_id)?;
        Ok(session_id)
    }

    /// Login user id, empty if unset.
    pub fn login_user_id(&self) -> String {
        self.sharer.get_string(keys::LOGIN_USER_ID, "")
    }

    /// Login user key, empty if unset.
    pub fn login_user_key(&self) -> String {
        self.sharer.get_string(keys::LOGIN_USER_KEY, "")
    }

    /// Store the login user id, leaving the user key untouched.
    pub fn set_login_user_id(&self, user_id: &str) -> Result<()> {
        Ok(self.sharer.put_string(keys::LOGIN_USER_ID, user_id)?)
    }

    /// Store login user id and key together.
    pub fn set_login_user(&self, user_id: &str, user_key: &str) -> Result<()> {
        Ok(self.sharer.put_strings(&[
            (keys::LOGIN_USER_ID, user_id),
            (keys::LOGIN_USER_KEY, user_key),
        ])?)
    }

    /// Last non-empty login user id.
    pub fn latest_non_null_user_id(&self) -> String {
        self.sharer.get_string(keys::LATEST_NON_NULL_USER_ID, "")
    }

    /// Store the last non-empty login user id.
    pub fn set_latest_non_null_user_id(&self, user_id: &str) -> Result<()> {
        Ok(self
            .sharer
            .put_string(keys::LATEST_NON_NULL_USER_ID, user_id)?)
    }

    /// Time of the last pause, 0 if unset.
    pub fn latest_pause_time(&self) -> i64 {
        self.sharer.get_long(keys::LATEST_PAUSE_TIME, 0)
    }

    /// Store the time of the last pause.
    pub fn set_latest_pause_time(&self, time: i64) -> Result<()> {
        Ok(self.sharer.put_long(keys::LATEST_PAUSE_TIME, time)?)
    }

    /// Foreground activity count across processes.
    pub fn activity_count(&self) -> i32 {
        self.sharer.get_int(keys::ACTIVITY_COUNT, 0)
    }

    /// Overwrite the activity count.
    pub fn set_activity_count(&self, count: i32) -> Result<()> {
        Ok(self.sharer.put_int(keys::ACTIVITY_COUNT, count)?)
    }

    /// Increment the activity count; returns the previous value.
    pub fn add_activity(&self) -> Result<i32> {
        Ok(self.sharer.get_and_add_int(keys::ACTIVITY_COUNT, 1, 0)?)
    }

    /// Decrement the activity count; returns the previous value.
    pub fn remove_activity(&self) -> Result<i32> {
        Ok(self.sharer.get_and_add_int(keys::ACTIVITY_COUNT, -1, 0)?)
    }

    /// Whether a visit is sent after the session id is refreshed.
    pub fn send_visit_after_refresh(&self) -> bool {
        self.sharer
            .get_boolean(keys::SEND_VISIT_AFTER_REFRESH_SESSION_ID, false)
    }

    /// Set whether a visit is sent after the session id is refreshed.
    pub fn set_send_visit_after_refresh(&self, send: bool) -> Result<()> {
        Ok(self
            .sharer
            .put_boolean(keys::SEND_VISIT_AFTER_REFRESH_SESSION_ID, send)?)
    }

    /// Read any string key.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.sharer.get_string(key, default)
    }

    /// Write any string key.
    pub fn put_string(&self, key: &str, value: &str) -> Result<()> {
        Ok(self.sharer.put_string(key, value)?)
    }

    /// Enable or disable the new-device marker.
    ///
    /// When enabled, it is bound to this process and the current session.
    pub fn set_new_device_token(&self, is_new: bool) -> Result<()> {
        let token = if is_new {
            format!("true::{}::{}", self.pid, self.session_id())
        } else {
            DISABLED_DEVICE_TOKEN.to_string()
        };
        Ok(self.sharer.put_string(keys::NEW_DEVICE_TOKEN, &token)?)
    }

    /// Whether the device id was assigned as new in this process and session.
    ///
    /// A token from an earlier session is disabled on first inspection.
    /// Trailing empty fields are dropped before the fields are counted, so
    /// the unset default and a token written without a session are
    /// malformed and get disabled too.
    pub fn is_new_device(&self) -> Result<bool> {
        let token = self.sharer.get_string(keys::NEW_DEVICE_TOKEN, "true::0::");
        let mut parts: Vec<&str> = token.split("::").collect();
        while parts.last().is_some_and(|part| part.is_empty()) {
            parts.pop();
        }
        let [enabled, pid, session] = parts.as_slice() else {
            self.set_new_device_token(false)?;
            return Ok(false);
        };
        if enabled.eq_ignore_ascii_case("false") {
            return Ok(false);
        }
        if *pid == "0" {
            return Ok(true);
        }
        if *pid != self.pid.to_string() {
            return Ok(false);
        }
        let is_new = *session == self.session_id();
        if !is_new {
            self.set_new_device_token(false)?;
        }
        Ok(is_new)
    }

    /// Process ids currently registered.
    pub fn alive_pids(&self) -> Vec<i32> {
        self.sharer.get_int_array(keys::ALIVE_PID, &[])
    }

    /// Register this process and find out whether it is the first one alive.
    ///
    /// Dead entries are pruned from the registry. The first process resets
    /// the per-run state: activity count, pause time and the session.
    pub fn register_process<P: ProcessProbe + ?Sized>(&self, probe: &P) -> Result<ProcessRole> {
        let lock = self.process_lock();
        let _guard = lock.guard()?;

        let current = probe.current_pid();
        let mut alive: Vec<i32> = self
            .alive_pids()
            .into_iter()
            .filter(|&pid| pid != current && probe.is_alive(pid))
            .collect();
        let role = if alive.is_empty() {
            ProcessRole::First
        } else {
            ProcessRole::Joined
        };
        alive.push(current);
        self.sharer.put_int_array(keys::ALIVE_PID, &alive)?;

        if role == ProcessRole::First {
            self.set_activity_count(0)?;
            self.set_latest_pause_time(0)?;
            self.set_latest_non_null_user_id(&self.login_user_id())?;
            let session = self.refresh_session()?;
            self.set_send_visit_after_refresh(false)?;
            info!("process {current} is the first alive process, session {session}");
        } else {
            debug!(
                "process {current} joined {} alive process(es)",
                alive.len() - 1
            );
        }
        self.first_process
            .store(role == ProcessRole::First, Ordering::Release);
        Ok(role)
    }

    /// Result of the last [`register_process`](Self::register_process) call.
    ///
    /// True before any registration.
    pub fn is_first_process(&self) -> bool {
        self.first_process.load(Ordering::Acquire)
    }

    /// Import identifiers from the previous storage format once.
    ///
    /// Does nothing when the import already ran. Returns whether it ran now.
    pub fn import_legacy(&self, sources: &LegacySources) -> Result<bool> {
        let lock = self.process_lock();
        let _guard = lock.guard()?;

        if self.sharer.contains_key(keys::KEEP_ID)? {
            return Ok(false);
        }

        if let Some(device_id) = &sources.device_id {
            self.set_device_id(device_id)?;
        }
        match sources.read_user_id() {
            Ok(Some(entry)) => {
                if let Value::String(user_id) = &entry.value {
                    self.set_login_user(user_id, "")?;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("legacy user id unreadable, skipping: {e}"),
        }

        self.sharer.put_string(keys::KEEP_ID, "true")?;
        info!("legacy identifiers imported");
        Ok(true)
    }
}
