//! Store trait definitions

use crate::{HistoryEntry, StoreResult};

/// Durable key to blob storage plus the lock history log.
///
/// Blobs are opaque here: framing and integrity checks happen before bytes
/// are handed to the store and after they come back.
pub trait PersistenceStore: Send + Sync {
    // Blobs

    /// Read a blob; `None` if the key was never written
    fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write (replace) a blob
    fn write(&self, key: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Write several blobs; implementations should apply all or none
    fn write_batch(&self, entries: &[(&str, &[u8])]) -> StoreResult<()> {
        for (key, bytes) in entries {
            self.write(key, bytes)?;
        }
        Ok(())
    }

    // History

    /// Append a history entry
    fn append_history(&self, entry: HistoryEntry) -> StoreResult<()>;

    /// Most recent history entries, newest first
    fn recent_history(&self, limit: usize) -> StoreResult<Vec<HistoryEntry>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
