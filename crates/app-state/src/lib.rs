//! Application state for the convention companion cache
//!
//! This crate provides the normalized entity store, the reducer that owns
//! every state transition, debounced persistence of store keys, and the
//! synchronization engine, composed behind the [`Cache`] facade.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod entity_store;
pub mod hydration;
pub mod persistence;
pub mod reducer;
pub mod sorters;
pub mod store;
pub mod sync;
pub mod values;

pub use cache::{Cache, CacheConfig, CacheError, Haptics, NoHaptics};
pub use entity_store::{apply_change, Entity, EntityChange, EntityStore};
pub use hydration::{dehydrate, hydrate, hydrate_all, Hydration, HydrationError};
pub use persistence::PersistenceCoordinator;
pub use reducer::{reduce, EntitiesChange, StoreAction};
pub use store::{
    CollectionEntity, Entities, EntityKey, Internals, InternalsPatch, Store, StoreData, StoreKey,
    Values,
};
pub use sync::{SyncError, SyncOutcome, Synchronizer};
pub use values::{NotificationKind, ScheduledNotification, Settings, StoreValue, Theme, ValueKey};
