//! Store data model and the dispatching store handle
//!
//! [`StoreData`] is the single aggregate the cache holds: internals, values,
//! and entity collections. It is persisted key by key, one storage entry per
//! [`StoreKey`]. Every field that can be large sits behind an `Arc`, so
//! cloning `StoreData` is cheap and "did this key change" is a pointer check.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use api_client::{
    AnnouncementRecord, CommunicationRecord, DealerRecord, EventDayRecord, EventRecord,
    EventRoomRecord, EventTrackRecord, ImageRecord, KnowledgeEntryRecord, KnowledgeGroupRecord,
    MapRecord,
};

use crate::entity_store::{Entity, EntityChange, EntityStore};
use crate::reducer::{reduce, EntitiesChange, StoreAction};
use crate::values::{ScheduledNotification, Settings, ValueKey};

// =============================================================================
// Keys
// =============================================================================

/// Name of an entity collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// Announcements
    Announcements,
    /// Dealers
    Dealers,
    /// Images
    Images,
    /// Events
    Events,
    /// Conference days
    EventDays,
    /// Conference rooms
    EventRooms,
    /// Conference tracks
    EventTracks,
    /// Knowledge base groups
    KnowledgeGroups,
    /// Knowledge base entries
    KnowledgeEntries,
    /// Maps
    Maps,
    /// Private messages
    Communications,
}

impl EntityKey {
    /// All collections
    pub const ALL: [EntityKey; 11] = [
        EntityKey::Announcements,
        EntityKey::Dealers,
        EntityKey::Images,
        EntityKey::Events,
        EntityKey::EventDays,
        EntityKey::EventRooms,
        EntityKey::EventTracks,
        EntityKey::KnowledgeGroups,
        EntityKey::KnowledgeEntries,
        EntityKey::Maps,
        EntityKey::Communications,
    ];

    /// Collections delivered by the sync endpoint
    pub const SYNCHRONIZED: [EntityKey; 10] = [
        EntityKey::Announcements,
        EntityKey::Dealers,
        EntityKey::Images,
        EntityKey::Events,
        EntityKey::EventDays,
        EntityKey::EventRooms,
        EntityKey::EventTracks,
        EntityKey::KnowledgeGroups,
        EntityKey::KnowledgeEntries,
        EntityKey::Maps,
    ];

    /// Storage name of the collection
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKey::Announcements => "announcements",
            EntityKey::Dealers => "dealers",
            EntityKey::Images => "images",
            EntityKey::Events => "events",
            EntityKey::EventDays => "eventDays",
            EntityKey::EventRooms => "eventRooms",
            EntityKey::EventTracks => "eventTracks",
            EntityKey::KnowledgeGroups => "knowledgeGroups",
            EntityKey::KnowledgeEntries => "knowledgeEntries",
            EntityKey::Maps => "maps",
            EntityKey::Communications => "communications",
        }
    }
}

/// Top-level key of [`StoreData`], one storage entry each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Convention identifier of the cached dataset
    Cid,
    /// Schema version of the cached dataset
    CacheVersion,
    /// Time of the last successful sync
    LastSynchronised,
    /// A value slot
    Value(ValueKey),
    /// An entity collection
    Entity(EntityKey),
}

impl StoreKey {
    /// Every persisted key
    pub fn all() -> Vec<StoreKey> {
        let mut keys = vec![StoreKey::Cid, StoreKey::CacheVersion, StoreKey::LastSynchronised];
        keys.extend(ValueKey::ALL.iter().copied().map(StoreKey::Value));
        keys.extend(EntityKey::ALL.iter().copied().map(StoreKey::Entity));
        keys
    }

    /// Storage name of the key
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Cid => "cid",
            StoreKey::CacheVersion => "cacheVersion",
            StoreKey::LastSynchronised => "lastSynchronised",
            StoreKey::Value(key) => key.as_str(),
            StoreKey::Entity(key) => key.as_str(),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Data
// =============================================================================

/// Identity of the cached dataset
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Internals {
    /// Convention identifier
    pub cid: String,
    /// Schema version
    pub cache_version: u32,
    /// Time of the last successful sync, the Unix epoch if never synced
    pub last_synchronised: DateTime<Utc>,
}

impl Internals {
    /// Check if a sync has ever been committed
    pub fn has_synchronised(&self) -> bool {
        self.last_synchronised != DateTime::<Utc>::default()
    }
}

/// Partial update of [`Internals`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InternalsPatch {
    /// New convention identifier
    pub cid: Option<String>,
    /// New schema version
    pub cache_version: Option<u32>,
    /// New last sync time
    pub last_synchronised: Option<DateTime<Utc>>,
}

impl InternalsPatch {
    /// Check if the patch sets nothing
    pub fn is_empty(&self) -> bool {
        self.cid.is_none() && self.cache_version.is_none() && self.last_synchronised.is_none()
    }
}

/// Value slots, `None` when removed
#[derive(Debug, Clone)]
pub struct Values {
    /// User settings
    pub settings: Option<Arc<Settings>>,
    /// Scheduled notifications
    pub notifications: Option<Arc<Vec<ScheduledNotification>>>,
}

impl Default for Values {
    fn default() -> Self {
        Self {
            settings: Some(Arc::new(Settings::default())),
            notifications: Some(Arc::new(Vec::new())),
        }
    }
}

/// All entity collections
#[derive(Debug, Clone, Default)]
pub struct Entities {
    /// Announcements
    pub announcements: Arc<EntityStore<AnnouncementRecord>>,
    /// Dealers
    pub dealers: Arc<EntityStore<DealerRecord>>,
    /// Images
    pub images: Arc<EntityStore<ImageRecord>>,
    /// Events
    pub events: Arc<EntityStore<EventRecord>>,
    /// Conference days
    pub event_days: Arc<EntityStore<EventDayRecord>>,
    /// Conference rooms
    pub event_rooms: Arc<EntityStore<EventRoomRecord>>,
    /// Conference tracks
    pub event_tracks: Arc<EntityStore<EventTrackRecord>>,
    /// Knowledge base groups
    pub knowledge_groups: Arc<EntityStore<KnowledgeGroupRecord>>,
    /// Knowledge base entries
    pub knowledge_entries: Arc<EntityStore<KnowledgeEntryRecord>>,
    /// Maps
    pub maps: Arc<EntityStore<MapRecord>>,
    /// Private messages
    pub communications: Arc<EntityStore<CommunicationRecord>>,
}

impl Entities {
    /// Number of entities in a collection
    pub fn len_of(&self, key: EntityKey) -> usize {
        match key {
            EntityKey::Announcements => self.announcements.len(),
            EntityKey::Dealers => self.dealers.len(),
            EntityKey::Images => self.images.len(),
            EntityKey::Events => self.events.len(),
            EntityKey::EventDays => self.event_days.len(),
            EntityKey::EventRooms => self.event_rooms.len(),
            EntityKey::EventTracks => self.event_tracks.len(),
            EntityKey::KnowledgeGroups => self.knowledge_groups.len(),
            EntityKey::KnowledgeEntries => self.knowledge_entries.len(),
            EntityKey::Maps => self.maps.len(),
            EntityKey::Communications => self.communications.len(),
        }
    }

    /// Total number of entities across all collections
    pub fn total(&self) -> usize {
        EntityKey::ALL.iter().map(|key| self.len_of(*key)).sum()
    }

    fn same_collection(&self, other: &Entities, key: EntityKey) -> bool {
        match key {
            EntityKey::Announcements => Arc::ptr_eq(&self.announcements, &other.announcements),
            EntityKey::Dealers => Arc::ptr_eq(&self.dealers, &other.dealers),
            EntityKey::Images => Arc::ptr_eq(&self.images, &other.images),
            EntityKey::Events => Arc::ptr_eq(&self.events, &other.events),
            EntityKey::EventDays => Arc::ptr_eq(&self.event_days, &other.event_days),
            EntityKey::EventRooms => Arc::ptr_eq(&self.event_rooms, &other.event_rooms),
            EntityKey::EventTracks => Arc::ptr_eq(&self.event_tracks, &other.event_tracks),
            EntityKey::KnowledgeGroups => {
                Arc::ptr_eq(&self.knowledge_groups, &other.knowledge_groups)
            }
            EntityKey::KnowledgeEntries => {
                Arc::ptr_eq(&self.knowledge_entries, &other.knowledge_entries)
            }
            EntityKey::Maps => Arc::ptr_eq(&self.maps, &other.maps),
            EntityKey::Communications => Arc::ptr_eq(&self.communications, &other.communications),
        }
    }
}

/// The whole cached state
#[derive(Debug, Clone, Default)]
pub struct StoreData {
    /// Dataset identity
    pub internals: Internals,
    /// Application values
    pub values: Values,
    /// Entity collections
    pub entities: Entities,
}

impl StoreData {
    /// Collection of one entity type
    pub fn collection<T: CollectionEntity>(&self) -> &Arc<EntityStore<T>> {
        T::collection(&self.entities)
    }

    /// Check whether `key` refers to a different value in `other`
    ///
    /// Scalars compare by value, everything behind an `Arc` by reference.
    pub fn key_changed(&self, other: &StoreData, key: StoreKey) -> bool {
        match key {
            StoreKey::Cid => self.internals.cid != other.internals.cid,
            StoreKey::CacheVersion => self.internals.cache_version != other.internals.cache_version,
            StoreKey::LastSynchronised => {
                self.internals.last_synchronised != other.internals.last_synchronised
            }
            StoreKey::Value(ValueKey::Settings) => {
                !same_slot(&self.values.settings, &other.values.settings)
            }
            StoreKey::Value(ValueKey::Notifications) => {
                !same_slot(&self.values.notifications, &other.values.notifications)
            }
            StoreKey::Entity(key) => !self.entities.same_collection(&other.entities, key),
        }
    }

    /// All keys whose value differs in `other`
    pub fn changed_keys(&self, other: &StoreData) -> Vec<StoreKey> {
        StoreKey::all().into_iter().filter(|key| self.key_changed(other, *key)).collect()
    }
}

fn same_slot<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

// =============================================================================
// Collection binding
// =============================================================================

/// An [`Entity`] bound to its collection in [`Entities`]
pub trait CollectionEntity: Entity {
    /// Collection this type lives in
    const KEY: EntityKey;

    /// The collection inside `entities`
    fn collection(entities: &Entities) -> &Arc<EntityStore<Self>>;

    /// Mutable slot of the collection inside `entities`
    fn collection_mut(entities: &mut Entities) -> &mut Arc<EntityStore<Self>>;

    /// Wrap a typed change into the reducer's change action
    fn into_change(change: EntityChange<Self>) -> EntitiesChange;
}

macro_rules! collection_entity {
    ($record:ty, $key:ident, $field:ident) => {
        impl CollectionEntity for $record {
            const KEY: EntityKey = EntityKey::$key;

            fn collection(entities: &Entities) -> &Arc<EntityStore<Self>> {
                &entities.$field
            }

            fn collection_mut(entities: &mut Entities) -> &mut Arc<EntityStore<Self>> {
                &mut entities.$field
            }

            fn into_change(change: EntityChange<Self>) -> EntitiesChange {
                EntitiesChange::$key(change)
            }
        }
    };
}

collection_entity!(AnnouncementRecord, Announcements, announcements);
collection_entity!(DealerRecord, Dealers, dealers);
collection_entity!(ImageRecord, Images, images);
collection_entity!(EventRecord, Events, events);
collection_entity!(EventDayRecord, EventDays, event_days);
collection_entity!(EventRoomRecord, EventRooms, event_rooms);
collection_entity!(EventTrackRecord, EventTracks, event_tracks);
collection_entity!(KnowledgeGroupRecord, KnowledgeGroups, knowledge_groups);
collection_entity!(KnowledgeEntryRecord, KnowledgeEntries, knowledge_entries);
collection_entity!(MapRecord, Maps, maps);
collection_entity!(CommunicationRecord, Communications, communications);

// =============================================================================
// Store handle
// =============================================================================

/// Owner of the current [`StoreData`]
///
/// All mutation goes through [`Store::dispatch`], which runs the reducer as
/// one atomic transition. Observers subscribe to a `watch` channel and are
/// only notified when a transition actually produced a new state.
#[derive(Clone)]
pub struct Store {
    tx: Arc<watch::Sender<Arc<StoreData>>>,
}

impl Store {
    /// Create a store holding `initial`
    pub fn new(initial: StoreData) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Current state
    pub fn state(&self) -> Arc<StoreData> {
        Arc::clone(&self.tx.borrow())
    }

    /// Apply an action; returns whether the state changed
    pub fn dispatch(&self, action: StoreAction) -> bool {
        self.tx.send_if_modified(|state| {
            let next = reduce(state, action);
            if Arc::ptr_eq(state, &next) {
                false
            } else {
                *state = next;
                true
            }
        })
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreData>> {
        self.tx.subscribe()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("receivers", &self.tx.receiver_count()).finish()
    }
}
