//! In-memory storage backend
//!
//! Used for ephemeral sessions and tests. Reads can be switched to fail, and
//! a number of upcoming writes can be made to fail, so callers can exercise
//! their recovery paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::kv::{Result, StorageBackend, StorageError};

/// In-memory storage backend
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
    fail_reads: Arc<AtomicBool>,
    failing_writes: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStorage {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with entries
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let storage = Self::new();
        {
            let mut map = storage.entries.lock();
            for (key, value) in entries {
                map.insert(key.into(), value.into());
            }
        }
        storage
    }

    /// Make every subsequent read fail with [`StorageError::Unavailable`]
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` write calls fail with [`StorageError::Unavailable`]
    ///
    /// A failed `multi_set` counts as one call and stores nothing.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Snapshot of a stored value, bypassing failure injection
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of individual key writes performed (batch writes count each key)
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<()> {
        let failed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StorageError::Unavailable("write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_reads()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_writes()?;
        self.entries.lock().insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>> {
        self.check_reads()?;
        let map = self.entries.lock();
        Ok(keys.iter().map(|key| (key.to_string(), map.get(*key).cloned())).collect())
    }

    async fn multi_set(&self, entries: &[(String, String)]) -> Result<()> {
        self.check_writes()?;
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert(key.clone(), value.clone());
        }
        self.writes.fetch_add(entries.len(), Ordering::SeqCst);
        Ok(())
    }
}
