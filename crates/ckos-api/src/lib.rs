//! Lock data model and protocol types for ckos
//!
//! This crate defines the types shared between the engine, the store and
//! the control loop:
//! - Lock session data model and lifetime counters
//! - Credentials and rejection reasons
//! - Commands and responses accepted by `ckosd`
//! - Events emitted by `ckosd`

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
