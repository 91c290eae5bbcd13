//! Host collaborator interfaces for ckos
//!
//! This crate defines the boundary between the lock engine and the device's
//! real-time clock. It contains a wall-clock implementation for the control
//! loop and a mock for tests; RTC register access lives elsewhere.

mod mock;
mod system;
mod traits;

pub use mock::*;
pub use system::*;
pub use traits::*;
