//! Default paths for ckos components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/ckos/config.toml` or `~/.config/ckos/config.toml`
//! - Data: `$XDG_DATA_HOME/ckos` or `~/.local/share/ckos`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const CKOS_CONFIG_ENV: &str = "CKOS_CONFIG";

/// Environment variable for overriding the data directory
pub const CKOS_DATA_DIR_ENV: &str = "CKOS_DATA_DIR";

/// Application subdirectory name
const APP_DIR: &str = "ckos";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Database filename within the data directory
pub const DATABASE_FILENAME: &str = "ckos.db";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$XDG_CONFIG_HOME/ckos/config.toml` (if XDG_CONFIG_HOME is set)
/// 2. `~/.config/ckos/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$XDG_DATA_HOME/ckos` (if XDG_DATA_HOME is set)
/// 2. `~/.local/share/ckos` (fallback)
///
/// `$CKOS_DATA_DIR` is not consulted here; `ckosd` applies it as an override.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}
