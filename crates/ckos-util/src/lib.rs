//! Shared utilities for ckos
//!
//! This crate provides:
//! - UTC time helpers (device time is whole seconds since the epoch)
//! - Duration formatting for status displays
//! - Attempt limiting for credential entry
//! - Default paths for config and data directories

mod paths;
mod rate_limit;
mod time;

pub use paths::*;
pub use rate_limit::*;
pub use time::*;
