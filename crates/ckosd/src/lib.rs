//! ckosd service internals
//!
//! The binary owns the async plumbing (stdin, stdout, timers, signals); this
//! library owns everything that decides what to do with a request or a timer,
//! so it can be driven synchronously in tests.

mod service;

pub use service::*;
