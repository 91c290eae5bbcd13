//! In-memory store for tests and simulation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::{HistoryEntry, PersistenceStore, StoreError, StoreResult};

/// Store backed by process memory, with injectable write failures
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    history: Mutex<Vec<HistoryEntry>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent blob write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful blob writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Flip every bit of one stored byte
    pub fn corrupt(&self, key: &str, index: usize) {
        if let Ok(mut blobs) = self.blobs.lock()
            && let Some(byte) = blobs.get_mut(key).and_then(|b| b.get_mut(index))
        {
            *byte ^= 0xFF;
        }
    }

    /// Replace a blob without going through failure injection
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(key.to_string(), bytes);
        }
    }

    fn blobs(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.blobs.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailed("injected write failure".into()));
        }
        Ok(())
    }
}

impl PersistenceStore for MemoryStore {
    fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.blobs()?.get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        self.check_writable()?;
        self.blobs()?.insert(key.to_string(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_batch(&self, entries: &[(&str, &[u8])]) -> StoreResult<()> {
        self.check_writable()?;
        let mut blobs = self.blobs()?;
        for (key, bytes) in entries {
            blobs.insert(key.to_string(), bytes.to_vec());
        }
        self.writes.fetch_add(entries.len(), Ordering::SeqCst);
        Ok(())
    }

    fn append_history(&self, mut entry: HistoryEntry) -> StoreResult<()> {
        let mut history = self.history.lock().map_err(|_| StoreError::LockPoisoned)?;
        entry.id = history.len() as i64 + 1;
        history.push(entry);
        Ok(())
    }

    fn recent_history(&self, limit: usize) -> StoreResult<Vec<HistoryEntry>> {
        let history = self.history.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(history.iter().rev().take(limit).cloned().collect())
    }

    fn is_healthy(&self) -> bool {
        !self.fail_writes.load(Ordering::SeqCst)
    }
}
