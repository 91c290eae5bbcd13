//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Lock engine tuning
    #[serde(default)]
    pub engine: RawEngineConfig,

    /// Durable storage settings
    #[serde(default)]
    pub storage: RawStorageConfig,
}

/// Engine and control loop settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawEngineConfig {
    /// How far ahead of the stored index a remote key may be (default: 100)
    pub rolling_key_window: Option<u32>,

    /// How long to wait for the actuator to confirm an unlock
    pub pending_unlock_timeout_seconds: Option<u64>,

    /// Accrual tick period
    pub tick_interval_seconds: Option<u64>,

    /// Unlock attempts allowed per window before the caller throttles
    pub max_unlock_attempts: Option<u32>,

    pub attempt_window_seconds: Option<u32>,
}

/// Storage settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawStorageConfig {
    /// Data directory for the database (default: XDG data dir)
    pub data_dir: Option<PathBuf>,

    /// Blob key for the lock session
    pub session_key: Option<String>,

    /// Blob key for the lifetime counters
    pub counters_key: Option<String>,
}
