//! Local-first cache and sync engine for a convention companion app
//!
//! This crate re-exports the workspace members:
//! - [`storage`]: key-value storage backends
//! - [`api_client`]: the remote sync endpoint client and wire records
//! - [`app_state`]: the entity store, reducer, persistence, sync engine and
//!   the [`Cache`] facade

#![warn(missing_docs)]

pub use api_client;
pub use app_state;
pub use storage;

pub use api_client::{ApiClient, ApiClientConfig, ApiError, SyncApi};
pub use app_state::{Cache, CacheConfig, CacheError, Haptics, NoHaptics, SyncOutcome};
pub use storage::{MemoryStorage, SledConfig, SledStorage, StorageBackend};
