//! Command types for the ckosd protocol
//!
//! Requests and responses are exchanged as newline-delimited JSON.

use serde::{Deserialize, Serialize};

use crate::{
    CounterBucket, Credential, KeyPurpose, LockStatus, ModeConfig, TimeCounters, API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidConfig,
    InvalidStateTransition,
    CredentialRejected,
    RateLimited,
    StorageError,
    IntegrityError,
    InternalError,
}

/// All commands the control loop accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Get the current lock status
    GetStatus,

    /// Get lifetime served-time counters
    GetCounters,

    /// Get recent lock history entries
    GetHistory { limit: usize },

    /// Choose a lock type and its configuration
    Configure {
        config: ModeConfig,
        /// Caller already walked the wearer through the long-lock confirmation
        #[serde(default)]
        confirmed: bool,
    },

    /// Leave configuration without locking
    CancelConfiguration,

    /// Configuration done, wait for the door to close
    Finalize,

    /// Hardware reports the door closed
    DoorClosed,

    /// Present a credential to end the session
    AttemptUnlock { credential: Credential },

    /// Hardware confirms the physical unlock
    UnlockConfirmed,

    /// Hardware reports the unlock failed
    UnlockFailed,

    /// Start a break with an explicit allowance
    StartBreak { allowed_seconds: u16 },

    /// Start a cleaning break authorized by a remote cleaning key
    StartCleaningBreak { key: String },

    /// End the active break
    EndBreak,

    /// Move the unlock target (mini-game outcomes, agent mood effects)
    AdjustTarget { delta_seconds: i64 },

    /// Change the remote keyholder break duration with a config key
    UpdateRemoteBreak { key: String, minutes: u16 },

    /// Redeem a remote key without acting on it (keeps indices in sync)
    RedeemRemoteKey { purpose: KeyPurpose, key: String },

    /// Hardware or supervisor reports an unrecoverable fault
    Fault { reason: String },

    /// Leave the error state
    OperatorReset,

    /// Wipe the session and the lifetime counters
    FactoryReset,

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Status(LockStatus),
    Counters(TimeCounters),
    History {
        entries: Vec<serde_json::Value>,
    },
    Configured,
    ConfigurationCancelled,
    AwaitingDoorClose,
    Locked {
        unlock_target_utc: Option<u32>,
    },
    UnlockRequested,
    Unlocked {
        bucket: Option<CounterBucket>,
        served_seconds: u32,
    },
    UnlockAborted,
    BreakStarted {
        deadline_utc: u32,
    },
    BreakEnded {
        elapsed_seconds: u32,
        overdue: bool,
        unlock_target_utc: Option<u32>,
    },
    TargetAdjusted {
        unlock_target_utc: u32,
    },
    KeyAccepted {
        purpose: KeyPurpose,
        next_index: u32,
    },
    Faulted,
    Reset,
    Pong,
}
