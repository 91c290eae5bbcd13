//! Lock history entries

use ckos_api::{CounterBucket, LockType, RejectReason};
use serde::{Deserialize, Serialize};

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    /// Control loop started
    ServiceStarted,

    /// Control loop stopped
    ServiceStopped,

    /// The door closed and a session began
    SessionStarted {
        lock_type: LockType,
        unlock_target_utc: Option<u32>,
    },

    /// A session ended and its served time was credited
    SessionCompleted {
        lock_type: LockType,
        bucket: Option<CounterBucket>,
        served_seconds: u32,
    },

    /// A credential was presented and refused
    CredentialRejected {
        lock_type: LockType,
        reason: RejectReason,
    },

    /// A break ended
    BreakEnded {
        elapsed_seconds: u32,
        allowed_seconds: u16,
        overdue: bool,
    },

    /// Unlock target moved by a collaborator
    TargetAdjusted { delta_seconds: i64, unlock_target_utc: u32 },

    /// Remote keyholder changed the break duration
    RemoteBreakUpdated { minutes: u16 },

    /// Persisted state failed verification at boot and was reset
    IntegrityReset { session: bool, counters: bool },

    /// The engine entered the error state
    Fault { reason: String },

    /// Operator cleared the error state
    OperatorReset,

    /// Session and counters wiped
    FactoryReset,
}

/// History entry with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Row id (assigned by the store)
    pub id: i64,

    /// UTC seconds when it happened
    pub utc: u32,

    pub event: HistoryEvent,
}

impl HistoryEntry {
    pub fn new(utc: u32, event: HistoryEvent) -> Self {
        Self {
            id: 0, // Will be set by store
            utc,
            event,
        }
    }
}
