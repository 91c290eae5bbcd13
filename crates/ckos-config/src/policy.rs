//! Validated settings structures

use crate::schema::{RawConfig, RawEngineConfig, RawStorageConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Default rolling key look-ahead
pub const DEFAULT_ROLLING_KEY_WINDOW: u32 = 100;

/// Upper bound for the rolling key look-ahead
pub const MAX_ROLLING_KEY_WINDOW: u32 = 1024;

pub const DEFAULT_SESSION_KEY: &str = "lock_session";
pub const DEFAULT_COUNTERS_KEY: &str = "time_counters";

const DEFAULT_PENDING_UNLOCK_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_TICK_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_MAX_UNLOCK_ATTEMPTS: u32 = 5;
const DEFAULT_ATTEMPT_WINDOW_SECONDS: u32 = 300;

/// Validated settings ready for the engine and the control loop
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub control: ControlSettings,
    pub storage: StorageSettings,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            engine: EngineSettings::from_raw(&raw.engine, &raw.storage),
            control: ControlSettings::from_raw(&raw.engine),
            storage: StorageSettings::from_raw(raw.storage),
        }
    }
}

/// Settings consumed by the lock engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub rolling_key_window: u32,
    /// Store key holding the framed lock session
    pub session_key: String,
    /// Store key holding the framed time counters
    pub counters_key: String,
}

impl EngineSettings {
    fn from_raw(engine: &RawEngineConfig, storage: &RawStorageConfig) -> Self {
        Self {
            rolling_key_window: engine
                .rolling_key_window
                .unwrap_or(DEFAULT_ROLLING_KEY_WINDOW),
            session_key: storage
                .session_key
                .clone()
                .unwrap_or_else(|| DEFAULT_SESSION_KEY.to_string()),
            counters_key: storage
                .counters_key
                .clone()
                .unwrap_or_else(|| DEFAULT_COUNTERS_KEY.to_string()),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rolling_key_window: DEFAULT_ROLLING_KEY_WINDOW,
            session_key: DEFAULT_SESSION_KEY.to_string(),
            counters_key: DEFAULT_COUNTERS_KEY.to_string(),
        }
    }
}

/// Control loop policy (timeouts and attempt limiting live outside the engine)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSettings {
    pub pending_unlock_timeout: Duration,
    pub tick_interval: Duration,
    pub max_unlock_attempts: u32,
    pub attempt_window_seconds: u32,
}

impl ControlSettings {
    fn from_raw(engine: &RawEngineConfig) -> Self {
        Self {
            pending_unlock_timeout: Duration::from_secs(
                engine
                    .pending_unlock_timeout_seconds
                    .unwrap_or(DEFAULT_PENDING_UNLOCK_TIMEOUT_SECONDS),
            ),
            tick_interval: Duration::from_secs(
                engine
                    .tick_interval_seconds
                    .unwrap_or(DEFAULT_TICK_INTERVAL_SECONDS),
            ),
            max_unlock_attempts: engine
                .max_unlock_attempts
                .unwrap_or(DEFAULT_MAX_UNLOCK_ATTEMPTS),
            attempt_window_seconds: engine
                .attempt_window_seconds
                .unwrap_or(DEFAULT_ATTEMPT_WINDOW_SECONDS),
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self::from_raw(&RawEngineConfig::default())
    }
}

/// Storage location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
}

impl StorageSettings {
    fn from_raw(raw: RawStorageConfig) -> Self {
        Self {
            data_dir: raw
                .data_dir
                .unwrap_or_else(ckos_util::data_dir_without_env),
        }
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(ckos_util::DATABASE_FILENAME)
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self::from_raw(RawStorageConfig::default())
    }
}
