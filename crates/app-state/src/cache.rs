//! Cache facade
//!
//! [`Cache`] is the interface the rest of the application depends on. It
//! owns the store, the persistence coordinator and the synchronizer, and is
//! only handed out once hydration from the storage backend has completed.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use api_client::SyncApi;
use storage::{StorageBackend, StorageError};

use crate::entity_store::EntityStore;
use crate::hydration::{hydrate_all, HydrationError};
use crate::persistence::{PersistenceCoordinator, DEFAULT_DEBOUNCE};
use crate::reducer::StoreAction;
use crate::store::{CollectionEntity, Store, StoreData};
use crate::sync::{SyncError, SyncOutcome, Synchronizer};
use crate::values::{ScheduledNotification, Settings, StoreValue, ValueKey};

/// Cache error types
#[derive(Debug, Error)]
pub enum CacheError {
    /// Synchronization failed
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Hydration error
    #[error("Hydration error: {0}")]
    Hydration(#[from] HydrationError),
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Convention this build targets
    pub convention_id: String,

    /// Schema version of the persisted cache
    pub cache_version: u32,

    /// Quiet period before a changed key is persisted
    pub persist_debounce: Duration,

    /// Start a background sync right after hydration
    pub sync_on_init: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            convention_id: "EF29".to_string(),
            cache_version: 1,
            persist_debounce: DEFAULT_DEBOUNCE,
            sync_on_init: true,
        }
    }
}

impl CacheConfig {
    /// Create config for a convention
    pub fn new(convention_id: impl Into<String>) -> Self {
        Self { convention_id: convention_id.into(), ..Default::default() }
    }

    /// Set cache schema version
    pub fn with_cache_version(mut self, cache_version: u32) -> Self {
        self.cache_version = cache_version;
        self
    }

    /// Set persistence debounce
    pub fn with_persist_debounce(mut self, debounce: Duration) -> Self {
        self.persist_debounce = debounce;
        self
    }

    /// Enable or disable the initial background sync
    pub fn with_sync_on_init(mut self, enabled: bool) -> Self {
        self.sync_on_init = enabled;
        self
    }
}

/// Device feedback for user-initiated cache operations
#[cfg_attr(test, mockall::automock)]
pub trait Haptics: Send + Sync {
    /// Play a short impact
    fn impact(&self);
}

/// Haptics that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHaptics;

impl Haptics for NoHaptics {
    fn impact(&self) {}
}

/// Local-first cache of the convention dataset
///
/// Call [`Cache::dispose`] before dropping: a dropped cache stops its
/// persistence task immediately and changes still inside their debounce
/// window are not written.
pub struct Cache {
    config: CacheConfig,
    store: Store,
    synchronizer: Arc<Synchronizer>,
    haptics: Arc<dyn Haptics>,
    persistence: Mutex<Option<PersistenceCoordinator>>,
    initial_sync: Mutex<Option<JoinHandle<()>>>,
}

impl Cache {
    /// Hydrate from `backend` and start persisting
    ///
    /// Never fails: unreadable storage falls back to an empty cache.
    pub async fn init(
        config: CacheConfig,
        backend: Arc<dyn StorageBackend>,
        api: Arc<dyn SyncApi>,
        haptics: Arc<dyn Haptics>,
    ) -> Self {
        let hydration = hydrate_all(&*backend).await;
        if hydration.recovered {
            tracing::warn!("Cache storage was unreadable, starting empty");
        }

        let store = Store::new(StoreData::default());
        store.dispatch(StoreAction::Reset(Box::new(hydration.data)));

        let persistence =
            PersistenceCoordinator::start(store.subscribe(), backend, config.persist_debounce);
        let synchronizer = Arc::new(Synchronizer::new(
            store.clone(),
            api,
            config.convention_id.clone(),
            config.cache_version,
        ));

        let initial_sync = config.sync_on_init.then(|| {
            let synchronizer = Arc::clone(&synchronizer);
            tokio::spawn(async move {
                if let Err(e) = synchronizer.synchronize().await {
                    tracing::warn!("Initial sync failed: {}", e);
                }
            })
        });

        tracing::info!(
            "Cache ready for {} ({} entities)",
            config.convention_id,
            store.state().entities.total()
        );

        Self {
            config,
            store,
            synchronizer,
            haptics,
            persistence: Mutex::new(Some(persistence)),
            initial_sync: Mutex::new(initial_sync),
        }
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Current state snapshot
    pub fn state(&self) -> Arc<StoreData> {
        self.store.state()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreData>> {
        self.store.subscribe()
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Read a value slot
    pub fn get_value(&self, key: ValueKey) -> Option<StoreValue> {
        let state = self.store.state();
        match key {
            ValueKey::Settings => {
                state.values.settings.as_deref().cloned().map(StoreValue::Settings)
            }
            ValueKey::Notifications => {
                state.values.notifications.as_deref().cloned().map(StoreValue::Notifications)
            }
        }
    }

    /// Replace a value slot
    pub fn set_value(&self, value: StoreValue) {
        self.store.dispatch(StoreAction::ValueSet(value));
    }

    /// Remove a value slot
    pub fn remove_value(&self, key: ValueKey) {
        self.store.dispatch(StoreAction::ValueDelete(key));
    }

    /// User settings, if set
    pub fn settings(&self) -> Option<Arc<Settings>> {
        self.store.state().values.settings.clone()
    }

    /// Scheduled notifications, if set
    pub fn notifications(&self) -> Option<Arc<Vec<ScheduledNotification>>> {
        self.store.state().values.notifications.clone()
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Whole collection of `E`
    pub fn entities<E: CollectionEntity>(&self) -> Arc<EntityStore<E>> {
        Arc::clone(self.store.state().collection::<E>())
    }

    /// One entity by id
    pub fn entity<E: CollectionEntity>(&self, id: &str) -> Option<Arc<E>> {
        self.store.state().collection::<E>().get(id).cloned()
    }

    /// Entities by id, in request order, skipping unknown ids
    pub fn entities_by_ids<E: CollectionEntity, S: AsRef<str>>(&self, ids: &[S]) -> Vec<Arc<E>> {
        self.store.state().collection::<E>().get_many(ids)
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Check if a synchronization is running
    pub fn is_synchronizing(&self) -> bool {
        self.synchronizer.is_synchronizing()
    }

    /// Observe the busy flag
    pub fn subscribe_synchronizing(&self) -> watch::Receiver<bool> {
        self.synchronizer.subscribe_synchronizing()
    }

    /// Synchronize with the remote dataset
    pub async fn synchronize(&self) -> Result<SyncOutcome> {
        Ok(self.synchronizer.synchronize().await?)
    }

    /// Synchronize on behalf of a user gesture such as pull-to-refresh
    pub async fn synchronize_ui(&self, vibrate: bool) -> Result<SyncOutcome> {
        if vibrate {
            self.haptics.impact();
        }
        self.synchronize().await.inspect_err(|e| {
            tracing::error!("Synchronization failed: {}", e);
        })
    }

    /// Replace private messages using a bearer token
    pub async fn synchronize_communications(&self, token: &str) -> Result<usize> {
        Ok(self.synchronizer.synchronize_communications(token).await?)
    }

    /// Drop all cached data and values
    ///
    /// Any running synchronization is cancelled so it cannot repopulate the
    /// cleared cache.
    pub fn clear(&self) {
        self.haptics.impact();
        self.synchronizer.reset();
        tracing::info!("Cache cleared");
    }

    /// Stop background work, writing every pending change first
    pub async fn dispose(&self) {
        if let Some(task) = self.initial_sync.lock().take() {
            task.abort();
        }
        self.synchronizer.cancel();

        let persistence = self.persistence.lock().take();
        if let Some(persistence) = persistence {
            persistence.shutdown().await;
        }
        tracing::debug!("Cache disposed");
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("synchronizer", &self.synchronizer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreKey;
    use crate::values::Theme;
    use api_client::{
        ApiError, CommunicationRecord, DeltaPackage, EventRoomRecord, SyncResponse,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use storage::MemoryStorage;

    struct StaticApi {
        response: api_client::Result<SyncResponse>,
    }

    #[async_trait]
    impl SyncApi for StaticApi {
        async fn fetch_sync(
            &self,
            _since: Option<DateTime<Utc>>,
        ) -> api_client::Result<SyncResponse> {
            self.response.clone()
        }

        async fn fetch_private_messages(
            &self,
            _token: &str,
        ) -> api_client::Result<Vec<CommunicationRecord>> {
            Err(ApiError::Status { status: 401, body: "unauthorized".to_string() })
        }
    }

    fn room(id: &str, name: &str) -> EventRoomRecord {
        EventRoomRecord {
            id: id.to_string(),
            last_change_date_time_utc: Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap(),
            name: name.to_string(),
            short_name: None,
        }
    }

    fn rooms_response() -> SyncResponse {
        let mut response =
            SyncResponse::empty("EF29", Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap());
        response.event_conference_rooms =
            DeltaPackage::replace(vec![room("r2", "Main Stage"), room("r1", "Art Show")]);
        response
    }

    fn config() -> CacheConfig {
        CacheConfig::new("EF29").with_sync_on_init(false)
    }

    async fn cache_with(
        backend: &MemoryStorage,
        response: api_client::Result<SyncResponse>,
        haptics: Arc<dyn Haptics>,
    ) -> Cache {
        Cache::init(
            config(),
            Arc::new(backend.clone()),
            Arc::new(StaticApi { response }),
            haptics,
        )
        .await
    }

    #[test]
    fn test_config_builders() {
        let config = CacheConfig::new("EF30")
            .with_cache_version(3)
            .with_persist_debounce(Duration::from_millis(50))
            .with_sync_on_init(false);

        assert_eq!(config.convention_id, "EF30");
        assert_eq!(config.cache_version, 3);
        assert_eq!(config.persist_debounce, Duration::from_millis(50));
        assert!(!config.sync_on_init);
    }

    #[tokio::test]
    async fn test_init_hydrates_from_backend() {
        let backend = MemoryStorage::with_entries([
            ("cid", "\"EF29\""),
            ("settings", "{\"theme\":\"dark\"}"),
        ]);

        let cache = cache_with(&backend, Ok(rooms_response()), Arc::new(NoHaptics)).await;

        assert_eq!(cache.state().internals.cid, "EF29");
        assert_eq!(cache.settings().unwrap().theme, Theme::Dark);
        assert!(!cache.is_synchronizing());
    }

    #[tokio::test]
    async fn test_init_survives_unreadable_storage() {
        let backend = MemoryStorage::with_entries([("cid", "\"EF28\"")]);
        backend.set_fail_reads(true);

        let cache = cache_with(&backend, Ok(rooms_response()), Arc::new(NoHaptics)).await;

        assert_eq!(cache.state().entities.total(), 0);
        assert_eq!(cache.settings().as_deref(), Some(&Settings::default()));
        assert_eq!(backend.len(), StoreKey::all().len());
    }

    #[tokio::test]
    async fn test_values_roundtrip_through_facade() {
        let backend = MemoryStorage::new();
        let cache = cache_with(&backend, Ok(rooms_response()), Arc::new(NoHaptics)).await;
        let settings = Settings { theme: Theme::Light, ..Default::default() };

        cache.set_value(StoreValue::Settings(settings.clone()));
        assert_eq!(cache.get_value(ValueKey::Settings), Some(StoreValue::Settings(settings)));

        cache.remove_value(ValueKey::Settings);
        assert_eq!(cache.get_value(ValueKey::Settings), None);
        assert_eq!(cache.get_value(ValueKey::Notifications), Some(StoreValue::Notifications(vec![])));
    }

    #[tokio::test]
    async fn test_dispose_flushes_pending_values() {
        let backend = MemoryStorage::new();
        let cache = cache_with(&backend, Ok(rooms_response()), Arc::new(NoHaptics)).await;

        cache.set_value(StoreValue::Settings(Settings { theme: Theme::Dark, ..Default::default() }));
        cache.dispose().await;

        assert!(backend.peek("settings").unwrap().contains("dark"));
    }

    #[tokio::test]
    async fn test_entity_accessors_after_sync() {
        let backend = MemoryStorage::new();
        let cache = cache_with(&backend, Ok(rooms_response()), Arc::new(NoHaptics)).await;

        cache.synchronize().await.unwrap();

        let names: Vec<String> =
            cache.entities::<EventRoomRecord>().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["Art Show", "Main Stage"]);
        assert_eq!(cache.entity::<EventRoomRecord>("r2").unwrap().name, "Main Stage");
        assert!(cache.entity::<EventRoomRecord>("r9").is_none());

        let picked = cache.entities_by_ids::<EventRoomRecord, _>(&["r2", "r9", "r1"]);
        let ids: Vec<&str> = picked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r1"]);
    }

    #[tokio::test]
    async fn test_synchronize_ui_vibrates_and_rethrows() {
        let mut haptics = MockHaptics::new();
        haptics.expect_impact().times(1).return_const(());
        let backend = MemoryStorage::new();
        let failure = Err(ApiError::ContentType("text/html".to_string()));
        let cache = cache_with(&backend, failure, Arc::new(haptics)).await;

        let result = cache.synchronize_ui(true).await;

        assert!(matches!(result, Err(CacheError::Sync(SyncError::Api(ApiError::ContentType(_))))));
        assert_eq!(cache.state().internals.cid, "");
    }

    #[tokio::test]
    async fn test_synchronize_ui_without_vibration() {
        let mut haptics = MockHaptics::new();
        haptics.expect_impact().times(0);
        let backend = MemoryStorage::new();
        let cache = cache_with(&backend, Ok(rooms_response()), Arc::new(haptics)).await;

        let outcome = cache.synchronize_ui(false).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Applied { full: true, .. }));
    }

    #[tokio::test]
    async fn test_clear_vibrates_and_resets() {
        let mut haptics = MockHaptics::new();
        haptics.expect_impact().times(1).return_const(());
        let backend = MemoryStorage::new();
        let cache = cache_with(&backend, Ok(rooms_response()), Arc::new(haptics)).await;
        cache.synchronize().await.unwrap();
        cache.set_value(StoreValue::Settings(Settings { theme: Theme::Dark, ..Default::default() }));

        cache.clear();

        let state = cache.state();
        assert_eq!(state.entities.total(), 0);
        assert_eq!(state.internals.cid, "");
        assert_eq!(cache.settings().as_deref(), Some(&Settings::default()));
    }

    #[tokio::test]
    async fn test_communications_error_surfaces() {
        let backend = MemoryStorage::new();
        let cache = cache_with(&backend, Ok(rooms_response()), Arc::new(NoHaptics)).await;

        let result = cache.synchronize_communications("expired").await;
        assert!(matches!(
            result,
            Err(CacheError::Sync(SyncError::Api(ApiError::Status { status: 401, .. })))
        ));
    }
}
