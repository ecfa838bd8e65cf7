//! Key-value storage backend
//!
//! This module defines the [`StorageBackend`] contract the cache persists its
//! keys through, and a sled-backed implementation for on-device storage.
//! Values are opaque strings; no schema is enforced at this layer.

use async_trait::async_trait;
use sled::Db;
use std::sync::Arc;
use thiserror::Error;

/// Storage backend error types
#[derive(Debug, Error)]
pub enum StorageError {
    /// Sled database error
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Stored bytes were not valid UTF-8
    #[error("Invalid value for key {0}: not UTF-8")]
    InvalidValue(String),

    /// Invalid key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Backend is unavailable or refused the operation
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Asynchronous string key-value store
///
/// Every persisted cache key maps to exactly one entry. Implementations must
/// be safe to share between the persistence coordinator and the cache facade.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Get the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, overwriting any previous value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read many keys at once, in the order requested
    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>>;

    /// Write many entries at once
    async fn multi_set(&self, entries: &[(String, String)]) -> Result<()>;
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".to_string()));
    }
    Ok(())
}

/// Sled storage configuration
#[derive(Debug, Clone)]
pub struct SledConfig {
    /// Database path
    pub path: String,
    /// Cache capacity in bytes
    pub cache_capacity: u64,
    /// Enable compression
    pub use_compression: bool,
    /// Flush interval in milliseconds (None for immediate flush)
    pub flush_every_ms: Option<u64>,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            path: "companion_cache.db".to_string(),
            cache_capacity: 16 * 1024 * 1024, // 16MB
            use_compression: true,
            flush_every_ms: Some(500),
        }
    }
}

impl SledConfig {
    /// Create a new configuration with a custom path
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), ..Default::default() }
    }

    /// Set cache capacity in bytes
    pub fn cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Enable or disable compression
    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.use_compression = enabled;
        self
    }

    /// Set flush interval in milliseconds
    pub fn flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }
}

/// Sled-backed storage
#[derive(Clone)]
pub struct SledStorage {
    db: Arc<Db>,
}

impl SledStorage {
    /// Open (or create) a sled database with configuration
    pub fn open(config: SledConfig) -> Result<Self> {
        let mut db_config = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity)
            .use_compression(config.use_compression);

        if let Some(ms) = config.flush_every_ms {
            db_config = db_config.flush_every_ms(Some(ms));
        }

        let db = db_config.open()?;
        tracing::debug!("Opened sled storage at {}", config.path);

        Ok(Self { db: Arc::new(db) })
    }

    /// Create a temporary sled database that is removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Get the number of stored keys
    pub fn len(&self) -> usize {
        self.db.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    fn decode(key: &str, bytes: sled::IVec) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|_| StorageError::InvalidValue(key.to_string()))
    }
}

#[async_trait]
impl StorageBackend for SledStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        self.db.get(key.as_bytes())?.map(|bytes| Self::decode(key, bytes)).transpose()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.db.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            validate_key(key)?;
            let value = self.db.get(key.as_bytes())?.map(|bytes| Self::decode(key, bytes)).transpose()?;
            values.push((key.to_string(), value));
        }
        Ok(values)
    }

    async fn multi_set(&self, entries: &[(String, String)]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            validate_key(key)?;
            batch.insert(key.as_bytes(), value.as_bytes());
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }
}
