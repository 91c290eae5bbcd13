//! Configuration validation

use crate::policy::{DEFAULT_COUNTERS_KEY, DEFAULT_SESSION_KEY, MAX_ROLLING_KEY_WINDOW};
use crate::schema::{RawConfig, RawEngineConfig, RawStorageConfig};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("{0} cannot be empty")]
    EmptyField(String),

    #[error("session_key and counters_key must differ (both are '{0}')")]
    DuplicateStorageKey(String),
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_engine(&config.engine);
    errors.extend(validate_storage(&config.storage));
    errors
}

fn validate_engine(engine: &RawEngineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(window) = engine.rolling_key_window {
        check_range(
            &mut errors,
            "engine.rolling_key_window",
            u64::from(window),
            1,
            u64::from(MAX_ROLLING_KEY_WINDOW),
        );
    }

    let positive = [
        (
            "engine.pending_unlock_timeout_seconds",
            engine.pending_unlock_timeout_seconds,
        ),
        ("engine.tick_interval_seconds", engine.tick_interval_seconds),
        (
            "engine.max_unlock_attempts",
            engine.max_unlock_attempts.map(u64::from),
        ),
        (
            "engine.attempt_window_seconds",
            engine.attempt_window_seconds.map(u64::from),
        ),
    ];
    for (field, value) in positive {
        if let Some(value) = value {
            check_range(&mut errors, field, value, 1, u64::from(u32::MAX));
        }
    }

    errors
}

fn validate_storage(storage: &RawStorageConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let session_key = storage.session_key.as_deref().unwrap_or(DEFAULT_SESSION_KEY);
    let counters_key = storage
        .counters_key
        .as_deref()
        .unwrap_or(DEFAULT_COUNTERS_KEY);

    if session_key.trim().is_empty() {
        errors.push(ValidationError::EmptyField("storage.session_key".into()));
    }
    if counters_key.trim().is_empty() {
        errors.push(ValidationError::EmptyField("storage.counters_key".into()));
    }
    if !session_key.trim().is_empty() && session_key == counters_key {
        errors.push(ValidationError::DuplicateStorageKey(session_key.to_string()));
    }

    if let Some(dir) = &storage.data_dir
        && dir.as_os_str().is_empty()
    {
        errors.push(ValidationError::EmptyField("storage.data_dir".into()));
    }

    errors
}

fn check_range(errors: &mut Vec<ValidationError>, field: &str, value: u64, min: u64, max: u64) {
    if value < min || value > max {
        errors.push(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawConfig {
        RawConfig {
            config_version: 1,
            engine: Default::default(),
            storage: Default::default(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&raw()).is_empty());
    }

    #[test]
    fn window_bounds() {
        let mut config = raw();
        config.engine.rolling_key_window = Some(0);
        assert!(matches!(
            validate_config(&config).as_slice(),
            [ValidationError::OutOfRange { value: 0, .. }]
        ));

        config.engine.rolling_key_window = Some(MAX_ROLLING_KEY_WINDOW);
        assert!(validate_config(&config).is_empty());

        config.engine.rolling_key_window = Some(MAX_ROLLING_KEY_WINDOW + 1);
        assert_eq!(validate_config(&config).len(), 1);
    }

    #[test]
    fn zero_timeouts_rejected() {
        let mut config = raw();
        config.engine.pending_unlock_timeout_seconds = Some(0);
        config.engine.tick_interval_seconds = Some(0);
        config.engine.max_unlock_attempts = Some(0);
        assert_eq!(validate_config(&config).len(), 3);
    }

    #[test]
    fn storage_keys_must_differ() {
        let mut config = raw();
        config.storage = RawStorageConfig {
            data_dir: None,
            session_key: Some("blob".into()),
            counters_key: Some("blob".into()),
        };
        let errors = validate_config(&config);
        assert_eq!(errors, vec![ValidationError::DuplicateStorageKey("blob".into())]);
    }

    #[test]
    fn errors_are_collected() {
        let mut config = raw();
        config.engine.rolling_key_window = Some(0);
        config.storage.session_key = Some(String::new());
        let errors = validate_config(&config);
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&ValidationError::EmptyField("storage.session_key".into())));
    }
}
