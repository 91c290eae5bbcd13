//! Event types emitted by ckosd

use serde::{Deserialize, Serialize};

use crate::{CounterBucket, LockStatus, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub utc: u32,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(utc: u32, payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            utc,
            payload,
        }
    }
}

/// Everything the control loop tells the UI and hardware collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Full status (sent after every state change)
    StateChanged(LockStatus),

    /// Hardware should release the lock mechanism
    ActuateUnlock,

    /// Hardware never confirmed the unlock; the session is locked again
    UnlockTimedOut,

    /// A session ended and its served time was recorded
    SessionCompleted {
        bucket: Option<CounterBucket>,
        served_seconds: u32,
    },

    /// A break ran over its allowance; served time was reset
    BreakOverdue {
        elapsed_seconds: u32,
        allowed_seconds: u16,
    },

    /// The timed target was reached
    TargetReached,

    /// The break allowance ran out while the break is still open
    BreakExpired,

    /// Persisted state failed its integrity check and was reset
    ConfigurationReset { session: bool, counters: bool },

    /// A write to durable storage failed
    StorageError { message: String },

    /// Service is shutting down
    Shutdown,
}
