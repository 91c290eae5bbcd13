//! Persistence layer for ckos
//!
//! Provides:
//! - Key to blob storage for the lock session and lifetime counters
//! - CRC-16 framing and versioned binary codecs for both aggregates
//! - Lock history log (append-only)

mod codec;
mod framing;
mod history;
mod memory;
mod sqlite;
mod traits;

pub use codec::*;
pub use framing::*;
pub use history::*;
pub use memory::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors (the durable write or read itself failed)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A persisted blob failed its integrity check
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("Blob too short: {0} bytes")]
    TooShort(usize),

    #[error("Checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u16, computed: u16 },

    #[error("Unsupported blob version: {0}")]
    UnsupportedVersion(u8),

    #[error("Malformed blob: {0}")]
    Malformed(String),
}

pub type IntegrityResult<T> = Result<T, IntegrityError>;
