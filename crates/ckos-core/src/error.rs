//! Engine error types

use ckos_api::{OperationalState, RejectReason};
use ckos_store::{IntegrityError, StoreError};
use thiserror::Error;

/// Why a configuration was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigViolation {
    #[error("a lock type must be chosen")]
    NoLockType,

    #[error("duration {value}s is outside {min}..={max}")]
    DurationOutOfRange { value: u32, min: u32, max: u32 },

    #[error("durations over one year need explicit confirmation")]
    ConfirmationRequired,

    #[error("too many games: {count} (max {max})")]
    TooManyGames { count: usize, max: usize },

    #[error("PIN must be exactly {expected} ASCII digits")]
    PinFormat { expected: usize },

    #[error("service id must be 1..={max} bytes, got {len}")]
    ServiceIdLength { len: usize, max: usize },

    #[error("identicon seed {0:#06x} does not fit in 15 bits")]
    IdenticonSeed(u16),

    #[error("break duration {value} minutes exceeds {max}")]
    BreakDuration { value: u16, max: u16 },

    #[error("no keyholder service is provisioned for remote keys")]
    RemoteKeysUnavailable,
}

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigViolation),

    #[error("'{command}' is not allowed while {state:?}")]
    InvalidStateTransition {
        command: &'static str,
        state: OperationalState,
    },

    #[error("Credential rejected: {0:?}")]
    CredentialRejected(RejectReason),

    #[error("Persisted state failed verification: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Persistence failed: {0}")]
    Persist(#[from] StoreError),
}

impl EngineError {
    pub(crate) fn transition(command: &'static str, state: OperationalState) -> Self {
        EngineError::InvalidStateTransition { command, state }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
