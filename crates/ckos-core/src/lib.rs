//! Lock session engine for ckos
//!
//! This crate is the heart of ckosd, containing:
//! - Session state machine (Unlocked -> Configuring -> AwaitingDoorClose -> Locked -> PendingUnlock -> Unlocked)
//! - Served-time accrual, breaks and the overdue penalty
//! - Credential validation (timer, agent release, PIN, rolling remote keys)
//! - Persist-before-commit over CRC-framed blobs

mod credentials;
mod engine;
mod error;
mod events;
mod session;

pub use credentials::*;
pub use engine::*;
pub use error::*;
pub use events::*;
pub use session::*;
