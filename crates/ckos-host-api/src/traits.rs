//! Clock collaborator traits

use thiserror::Error;

/// Errors from clock/alarm operations
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("Alarm scheduling failed: {0}")]
    AlarmFailed(String),

    #[error("Clock unavailable: {0}")]
    Unavailable(String),
}

pub type ClockResult<T> = Result<T, ClockError>;

/// Source of UTC time and wake alarms.
///
/// There is a single alarm slot: scheduling replaces any earlier request, so
/// the pending alarm always reflects the latest intended wake time.
pub trait ClockSource: Send + Sync {
    /// Current time in UTC seconds since the epoch
    fn now_utc(&self) -> u32;

    /// Schedule (or reschedule) the wake alarm
    fn schedule_alarm(&self, utc_seconds: u32) -> ClockResult<()>;

    /// Cancel the pending alarm, if any
    fn cancel_alarm(&self) -> ClockResult<()>;

    /// Currently scheduled alarm, if the implementation can report it
    fn pending_alarm(&self) -> Option<u32> {
        None
    }
}
