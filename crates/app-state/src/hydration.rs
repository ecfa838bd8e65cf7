//! Hydration and dehydration of persisted keys
//!
//! Each [`StoreKey`] has one storage entry holding a JSON blob:
//! scalars as JSON scalars, value slots as JSON (or `null` when removed),
//! and collections as a JSON array in canonical order.
//!
//! Cold start reads every key in one batch. Keys that are missing or fail to
//! parse keep their default. If the batch read itself fails, the stored
//! state is considered corrupt: defaults are written back for every key and
//! the cache starts from [`StoreData::default`].

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use api_client::{
    AnnouncementRecord, CommunicationRecord, DealerRecord, EventDayRecord, EventRecord,
    EventRoomRecord, EventTrackRecord, ImageRecord, KnowledgeEntryRecord, KnowledgeGroupRecord,
    MapRecord,
};
use storage::{StorageBackend, StorageError};

use crate::entity_store::EntityStore;
use crate::store::{CollectionEntity, EntityKey, StoreData, StoreKey};
use crate::values::ValueKey;

/// Hydration error types
#[derive(Debug, Error)]
pub enum HydrationError {
    /// Blob is not valid JSON for the key
    #[error("Invalid blob for {key}: {source}")]
    Json {
        /// Key being hydrated
        key: StoreKey,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },

    /// Value could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for hydration operations
pub type Result<T> = std::result::Result<T, HydrationError>;

/// Outcome of a cold-start hydration
#[derive(Debug)]
pub struct Hydration {
    /// Hydrated state
    pub data: StoreData,
    /// Whether the batch read failed and defaults were restored
    pub recovered: bool,
    /// Keys that were present but failed to parse
    pub failed_keys: Vec<StoreKey>,
}

// =============================================================================
// Dehydration
// =============================================================================

/// Serialize the value of one key
pub fn dehydrate(data: &StoreData, key: StoreKey) -> Result<String> {
    let blob = match key {
        StoreKey::Cid => serde_json::to_string(&data.internals.cid)?,
        StoreKey::CacheVersion => serde_json::to_string(&data.internals.cache_version)?,
        StoreKey::LastSynchronised => serde_json::to_string(&data.internals.last_synchronised)?,
        StoreKey::Value(ValueKey::Settings) => {
            serde_json::to_string(&data.values.settings.as_deref())?
        }
        StoreKey::Value(ValueKey::Notifications) => {
            serde_json::to_string(&data.values.notifications.as_deref())?
        }
        StoreKey::Entity(key) => match key {
            EntityKey::Announcements => dehydrate_collection::<AnnouncementRecord>(data)?,
            EntityKey::Dealers => dehydrate_collection::<DealerRecord>(data)?,
            EntityKey::Images => dehydrate_collection::<ImageRecord>(data)?,
            EntityKey::Events => dehydrate_collection::<EventRecord>(data)?,
            EntityKey::EventDays => dehydrate_collection::<EventDayRecord>(data)?,
            EntityKey::EventRooms => dehydrate_collection::<EventRoomRecord>(data)?,
            EntityKey::EventTracks => dehydrate_collection::<EventTrackRecord>(data)?,
            EntityKey::KnowledgeGroups => dehydrate_collection::<KnowledgeGroupRecord>(data)?,
            EntityKey::KnowledgeEntries => dehydrate_collection::<KnowledgeEntryRecord>(data)?,
            EntityKey::Maps => dehydrate_collection::<MapRecord>(data)?,
            EntityKey::Communications => dehydrate_collection::<CommunicationRecord>(data)?,
        },
    };
    Ok(blob)
}

fn dehydrate_collection<T: CollectionEntity>(data: &StoreData) -> serde_json::Result<String> {
    let entities: Vec<&T> = data.collection::<T>().iter().map(|entity| entity.as_ref()).collect();
    to_json(&entities)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string(value)
}

/// Serialize every key, as storage entries
pub fn dehydrate_all(data: &StoreData) -> Result<Vec<(String, String)>> {
    StoreKey::all()
        .into_iter()
        .map(|key| Ok((key.as_str().to_string(), dehydrate(data, key)?)))
        .collect()
}

// =============================================================================
// Hydration
// =============================================================================

/// Parse `raw` and write it into the slot of `key`
///
/// On error `data` is left untouched.
pub fn hydrate(data: &mut StoreData, key: StoreKey, raw: &str) -> Result<()> {
    let json_err = |source| HydrationError::Json { key, source };

    match key {
        StoreKey::Cid => data.internals.cid = serde_json::from_str(raw).map_err(json_err)?,
        StoreKey::CacheVersion => {
            data.internals.cache_version = serde_json::from_str(raw).map_err(json_err)?
        }
        StoreKey::LastSynchronised => {
            data.internals.last_synchronised = serde_json::from_str(raw).map_err(json_err)?
        }
        StoreKey::Value(ValueKey::Settings) => {
            let settings: Option<_> = serde_json::from_str(raw).map_err(json_err)?;
            data.values.settings = settings.map(Arc::new);
        }
        StoreKey::Value(ValueKey::Notifications) => {
            let notifications: Option<_> = serde_json::from_str(raw).map_err(json_err)?;
            data.values.notifications = notifications.map(Arc::new);
        }
        StoreKey::Entity(entity_key) => {
            let parsed = match entity_key {
                EntityKey::Announcements => hydrate_collection::<AnnouncementRecord>(data, raw),
                EntityKey::Dealers => hydrate_collection::<DealerRecord>(data, raw),
                EntityKey::Images => hydrate_collection::<ImageRecord>(data, raw),
                EntityKey::Events => hydrate_collection::<EventRecord>(data, raw),
                EntityKey::EventDays => hydrate_collection::<EventDayRecord>(data, raw),
                EntityKey::EventRooms => hydrate_collection::<EventRoomRecord>(data, raw),
                EntityKey::EventTracks => hydrate_collection::<EventTrackRecord>(data, raw),
                EntityKey::KnowledgeGroups => hydrate_collection::<KnowledgeGroupRecord>(data, raw),
                EntityKey::KnowledgeEntries => {
                    hydrate_collection::<KnowledgeEntryRecord>(data, raw)
                }
                EntityKey::Maps => hydrate_collection::<MapRecord>(data, raw),
                EntityKey::Communications => hydrate_collection::<CommunicationRecord>(data, raw),
            };
            parsed.map_err(json_err)?;
        }
    }
    Ok(())
}

fn hydrate_collection<T: CollectionEntity>(data: &mut StoreData, raw: &str) -> serde_json::Result<()> {
    let entities: Vec<T> = serde_json::from_str(raw)?;
    *T::collection_mut(&mut data.entities) = Arc::new(EntityStore::from_entities(entities));
    Ok(())
}

/// Read every key from `backend` and build the initial state
///
/// Never fails: a failed batch read falls back to defaults, which are
/// written back so the next cold start reads a clean snapshot.
pub async fn hydrate_all(backend: &dyn StorageBackend) -> Hydration {
    let keys = StoreKey::all();
    let names: Vec<&str> = keys.iter().map(|key| key.as_str()).collect();

    let entries = match backend.multi_get(&names).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Hydration read failed, restoring defaults: {}", e);
            let data = StoreData::default();
            if let Err(e) = write_snapshot(backend, &data).await {
                tracing::error!("Failed to write default snapshot: {}", e);
            }
            return Hydration { data, recovered: true, failed_keys: Vec::new() };
        }
    };

    let mut data = StoreData::default();
    let mut failed_keys = Vec::new();

    for (key, (_, raw)) in keys.into_iter().zip(entries) {
        let Some(raw) = raw else { continue };
        if let Err(e) = hydrate(&mut data, key, &raw) {
            tracing::warn!("Keeping default for {}: {}", key, e);
            failed_keys.push(key);
        }
    }

    tracing::debug!(
        "Hydrated cache for {} ({} entities)",
        data.internals.cid,
        data.entities.total()
    );

    Hydration { data, recovered: false, failed_keys }
}

/// Write every key of `data` to `backend` in one batch
pub async fn write_snapshot(backend: &dyn StorageBackend, data: &StoreData) -> Result<()> {
    let entries = dehydrate_all(data)?;
    backend.multi_set(&entries).await?;
    Ok(())
}
