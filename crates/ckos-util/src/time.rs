//! Time utilities for ckos
//!
//! The lock engine works exclusively in UTC seconds since the epoch, stored as
//! `u32`. Local time is only a display concern and is never persisted.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `CKOS_MOCK_TIME` environment variable can be set to
//! override the system time. The mock clock advances at the same rate as the
//! real one.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (interpreted as UTC)
//!
//! Example:
//! ```bash
//! CKOS_MOCK_TIME="2025-12-25 14:30:00" ckosd
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::sync::OnceLock;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "CKOS_MOCK_TIME";

pub const SECONDS_PER_MINUTE: u32 = 60;
pub const SECONDS_PER_HOUR: u32 = 3600;
pub const SECONDS_PER_DAY: u32 = 86_400;
pub const SECONDS_PER_YEAR: u32 = 365 * SECONDS_PER_DAY;

/// Offset between mock time and real time, fixed at first use.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match NaiveDateTime::parse_from_str(&mock_time_str, "%Y-%m-%d %H:%M:%S") {
                    Ok(naive_dt) => {
                        let mock_dt = Utc.from_utc_datetime(&naive_dt);
                        let offset = mock_dt.signed_duration_since(Utc::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    Err(_) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = "%Y-%m-%d %H:%M:%S",
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Current UTC time, respecting mock time in debug builds.
pub fn now() -> DateTime<Utc> {
    let real_now = Utc::now();
    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Current UTC time as device seconds.
///
/// Times before the epoch clamp to 0 and times past 2106 clamp to `u32::MAX`.
pub fn now_utc() -> u32 {
    datetime_to_utc(&now())
}

/// Convert a `chrono` timestamp to device seconds, clamping to the `u32` range.
pub fn datetime_to_utc(dt: &DateTime<Utc>) -> u32 {
    let secs = dt.timestamp();
    u32::try_from(secs.max(0)).unwrap_or(u32::MAX)
}

/// Convert device seconds to a `chrono` timestamp.
pub fn utc_to_datetime(utc_seconds: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(i64::from(utc_seconds), 0)
        .single()
        .unwrap_or_default()
}

/// Format device seconds for logs and history views.
pub fn format_utc(utc_seconds: u32) -> String {
    utc_to_datetime(utc_seconds)
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string()
}

/// Helper to format durations in human-readable form
pub fn format_duration(total_secs: u64) -> String {
    let days = total_secs / u64::from(SECONDS_PER_DAY);
    let hours = (total_secs % u64::from(SECONDS_PER_DAY)) / u64::from(SECONDS_PER_HOUR);
    let minutes = (total_secs % u64::from(SECONDS_PER_HOUR)) / u64::from(SECONDS_PER_MINUTE);
    let seconds = total_secs % u64::from(SECONDS_PER_MINUTE);

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Format a countdown as `HH:MM:SS`, saturating at `99:59:59` for the status line.
pub fn format_countdown(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    if hours > 99 {
        return "99:59:59".to_string();
    }
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
