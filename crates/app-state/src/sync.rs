//! Synchronization engine
//!
//! Reconciles the local entity collections with the remote sync endpoint.
//!
//! A call decides between a full and an incremental request, fetches on a
//! separate task, and applies the response as a fixed sequence of dispatches:
//! an optional reset, one change per collection, then the internals commit.
//!
//! Only the most recently started call may apply its result. Starting a call
//! aborts the fetch of the previous one, and a call that finds it has been
//! superseded when its fetch returns discards the response without
//! touching the store or the busy flag.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use api_client::{ApiError, SyncApi, SyncResponse};

use crate::entity_store::EntityChange;
use crate::reducer::{EntitiesChange, StoreAction};
use crate::store::{Internals, InternalsPatch, Store};

/// Synchronization error types
#[derive(Debug, Error)]
pub enum SyncError {
    /// The endpoint failed or answered with an invalid response
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// The fetch task failed
    #[error("Sync task failed: {0}")]
    Task(String),
}

/// Result type for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// How a synchronization call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The response was committed to the store
    Applied {
        /// Whether a full (not incremental) request was made
        full: bool,
        /// Whether the cache was reset for a new dataset
        reset: bool,
        /// Number of collections that changed
        changed: usize,
    },
    /// A newer call started before this one finished; nothing was applied
    Superseded,
}

struct Ticket {
    generation: u64,
    fetch: AbortHandle,
}

#[derive(Default)]
struct SyncSlot {
    generation: u64,
    current: Option<Ticket>,
}

impl SyncSlot {
    fn is_current(&self, generation: u64) -> bool {
        self.current.as_ref().is_some_and(|ticket| ticket.generation == generation)
    }
}

/// Drives synchronization of one store against one endpoint
pub struct Synchronizer {
    store: Store,
    api: Arc<dyn SyncApi>,
    convention_id: String,
    cache_version: u32,
    slot: Mutex<SyncSlot>,
    synchronizing: watch::Sender<bool>,
}

impl Synchronizer {
    /// Create a synchronizer for the dataset this build expects
    pub fn new(
        store: Store,
        api: Arc<dyn SyncApi>,
        convention_id: impl Into<String>,
        cache_version: u32,
    ) -> Self {
        let (synchronizing, _) = watch::channel(false);
        Self {
            store,
            api,
            convention_id: convention_id.into(),
            cache_version,
            slot: Mutex::new(SyncSlot::default()),
            synchronizing,
        }
    }

    /// Check if a synchronization is running
    pub fn is_synchronizing(&self) -> bool {
        *self.synchronizing.borrow()
    }

    /// Observe the busy flag
    pub fn subscribe_synchronizing(&self) -> watch::Receiver<bool> {
        self.synchronizing.subscribe()
    }

    /// Timestamp to sync from, or `None` when a full sync is required
    fn incremental_since(&self, internals: &Internals) -> Option<DateTime<Utc>> {
        let same_dataset =
            internals.cid == self.convention_id && internals.cache_version == self.cache_version;
        (same_dataset && internals.has_synchronised()).then_some(internals.last_synchronised)
    }

    /// Fetch changes and apply them to the store
    ///
    /// On error the store is left exactly as it was.
    pub async fn synchronize(&self) -> Result<SyncOutcome> {
        let (in_flight, fetch) = self.begin();
        let fetched = fetch.await;

        let mut slot = self.slot.lock();
        if !slot.is_current(in_flight.generation) {
            tracing::debug!("Discarding superseded sync #{}", in_flight.generation);
            return Ok(SyncOutcome::Superseded);
        }
        slot.current = None;

        let outcome = match fetched {
            Ok(Ok(response)) => Ok(self.apply(response, in_flight.full)),
            Ok(Err(e)) => {
                tracing::warn!("Sync failed: {}", e);
                Err(SyncError::Api(e))
            }
            Err(e) => Err(SyncError::Task(e.to_string())),
        };
        self.synchronizing.send_replace(false);
        outcome
    }

    /// Register a new call as the active one, cancelling its predecessor
    ///
    /// The request is planned from the state seen under the slot lock, so a
    /// concurrent [`Synchronizer::reset`] lands either before the plan or
    /// after the ticket is registered.
    fn begin(&self) -> (InFlight<'_>, JoinHandle<api_client::Result<SyncResponse>>) {
        let mut slot = self.slot.lock();

        let since = self.incremental_since(&self.store.state().internals);
        match since {
            Some(since) => tracing::debug!("Starting incremental sync since {}", since),
            None => tracing::info!("Starting full sync for {}", self.convention_id),
        }
        let api = Arc::clone(&self.api);
        let fetch = tokio::spawn(async move { api.fetch_sync(since).await });

        slot.generation += 1;
        let generation = slot.generation;
        let ticket = Ticket { generation, fetch: fetch.abort_handle() };
        if let Some(previous) = slot.current.replace(ticket) {
            tracing::debug!("Sync #{} supersedes #{}", generation, previous.generation);
            previous.fetch.abort();
        }
        self.synchronizing.send_replace(true);

        (InFlight { sync: self, generation, full: since.is_none() }, fetch)
    }

    /// Abort the active call, if any
    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        Self::abort_current(&mut slot, &self.synchronizing);
    }

    /// Abort the active call and reset the store to defaults
    ///
    /// No call started before the reset can apply afterwards.
    pub fn reset(&self) {
        let mut slot = self.slot.lock();
        Self::abort_current(&mut slot, &self.synchronizing);
        self.store.dispatch(StoreAction::Reset(Box::default()));
    }

    fn abort_current(slot: &mut SyncSlot, synchronizing: &watch::Sender<bool>) {
        if let Some(ticket) = slot.current.take() {
            tracing::debug!("Cancelling sync #{}", ticket.generation);
            ticket.fetch.abort();
            synchronizing.send_replace(false);
        }
    }

    /// Dispatch a validated response
    ///
    /// Must run while the caller holds the active ticket.
    fn apply(&self, response: SyncResponse, full: bool) -> SyncOutcome {
        let previous = self.store.state().internals.clone();
        let reset = response.convention_identifier != previous.cid
            || previous.cache_version != self.cache_version;

        if reset {
            tracing::info!(
                "Dataset changed from {:?} (v{}) to {:?} (v{}), resetting cache",
                previous.cid,
                previous.cache_version,
                response.convention_identifier,
                self.cache_version
            );
            self.store.dispatch(StoreAction::Reset(Box::default()));
            self.store.dispatch(StoreAction::InternalsSet(InternalsPatch {
                cid: Some(self.convention_id.clone()),
                cache_version: Some(self.cache_version),
                last_synchronised: Some(previous.last_synchronised),
            }));
        }

        let SyncResponse {
            convention_identifier,
            current_date_time_utc,
            events,
            event_conference_days,
            event_conference_rooms,
            event_conference_tracks,
            knowledge_groups,
            knowledge_entries,
            dealers,
            images,
            announcements,
            maps,
        } = response;

        let changes = [
            EntitiesChange::Announcements(announcements.into()),
            EntitiesChange::Dealers(dealers.into()),
            EntitiesChange::Images(images.into()),
            EntitiesChange::Events(events.into()),
            EntitiesChange::EventDays(event_conference_days.into()),
            EntitiesChange::EventRooms(event_conference_rooms.into()),
            EntitiesChange::EventTracks(event_conference_tracks.into()),
            EntitiesChange::KnowledgeGroups(knowledge_groups.into()),
            EntitiesChange::KnowledgeEntries(knowledge_entries.into()),
            EntitiesChange::Maps(maps.into()),
        ];
        let changed = changes
            .into_iter()
            .map(|change| self.store.dispatch(StoreAction::EntitiesChange(change)))
            .filter(|changed| *changed)
            .count();

        self.store.dispatch(StoreAction::InternalsSet(InternalsPatch {
            cid: Some(convention_identifier),
            cache_version: Some(self.cache_version),
            last_synchronised: Some(current_date_time_utc),
        }));

        tracing::info!(
            "Sync committed at {}: {} collection(s) changed",
            current_date_time_utc,
            changed
        );
        SyncOutcome::Applied { full, reset, changed }
    }

    /// Replace private messages with the recipient's current inbox
    ///
    /// Returns the number of messages received.
    pub async fn synchronize_communications(&self, token: &str) -> Result<usize> {
        let messages = self.api.fetch_private_messages(token).await?;
        let count = messages.len();
        self.store.dispatch(StoreAction::EntitiesChange(EntitiesChange::Communications(
            EntityChange::replace_all(messages),
        )));
        tracing::debug!("Received {} private message(s)", count);
        Ok(count)
    }
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("convention_id", &self.convention_id)
            .field("cache_version", &self.cache_version)
            .field("synchronizing", &self.is_synchronizing())
            .finish()
    }
}

/// Releases the active ticket if its call is dropped before settling
struct InFlight<'a> {
    sync: &'a Synchronizer,
    generation: u64,
    full: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut slot = self.sync.slot.lock();
        if slot.is_current(self.generation) {
            if let Some(ticket) = slot.current.take() {
                ticket.fetch.abort();
            }
            self.sync.synchronizing.send_replace(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_store::EntityStore;
    use crate::store::{EntityKey, StoreData};
    use api_client::{CommunicationRecord, DeltaPackage, EventRecord};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use tokio::sync::oneshot;

    struct Step {
        gate: Option<oneshot::Receiver<()>>,
        response: api_client::Result<SyncResponse>,
    }

    #[derive(Default)]
    struct ScriptedApi {
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<Option<DateTime<Utc>>>>,
        messages: Vec<CommunicationRecord>,
    }

    impl ScriptedApi {
        fn respond(&self, response: api_client::Result<SyncResponse>) {
            self.steps.lock().push_back(Step { gate: None, response });
        }

        fn respond_when_released(
            &self,
            response: api_client::Result<SyncResponse>,
        ) -> oneshot::Sender<()> {
            let (release, gate) = oneshot::channel();
            self.steps.lock().push_back(Step { gate: Some(gate), response });
            release
        }

        fn calls(&self) -> Vec<Option<DateTime<Utc>>> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl SyncApi for ScriptedApi {
        async fn fetch_sync(
            &self,
            since: Option<DateTime<Utc>>,
        ) -> api_client::Result<SyncResponse> {
            self.calls.lock().push(since);
            let step = self.steps.lock().pop_front();
            let step = step.expect("unexpected sync call");
            if let Some(gate) = step.gate {
                let _ = gate.await;
            }
            step.response
        }

        async fn fetch_private_messages(
            &self,
            _token: &str,
        ) -> api_client::Result<Vec<CommunicationRecord>> {
            Ok(self.messages.clone())
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 4, hour, 0, 0).unwrap()
    }

    fn event(id: &str, title: &str, hour: u32) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            last_change_date_time_utc: at(0),
            title: title.to_string(),
            sub_title: String::new(),
            summary: String::new(),
            description: String::new(),
            conference_day_id: None,
            conference_track_id: None,
            conference_room_id: None,
            start_date_time_utc: at(hour),
            end_date_time_utc: at(hour + 1),
            panel_hosts: String::new(),
            is_deviating_from_conbook: false,
            is_accepting_feedback: false,
            tags: vec![],
            banner_image_id: None,
            poster_image_id: None,
        }
    }

    fn synced_state(cid: &str, events: Vec<EventRecord>) -> StoreData {
        let mut data = StoreData::default();
        data.internals.cid = cid.to_string();
        data.internals.cache_version = 1;
        data.internals.last_synchronised = at(6);
        data.entities.events = Arc::new(EntityStore::from_entities(events));
        data
    }

    fn setup(initial: StoreData) -> (Store, Arc<ScriptedApi>, Arc<Synchronizer>) {
        let store = Store::new(initial);
        let api = Arc::new(ScriptedApi::default());
        let sync = Arc::new(Synchronizer::new(store.clone(), api.clone(), "EF29", 1));
        (store, api, sync)
    }

    fn event_ids(store: &Store) -> Vec<String> {
        store.state().entities.events.iter().map(|e| e.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_first_sync_is_full() {
        let (store, api, sync) = setup(StoreData::default());
        let mut response = SyncResponse::empty("EF29", at(9));
        response.events = DeltaPackage::replace(vec![event("e1", "Opening", 10)]);
        api.respond(Ok(response));

        let outcome = sync.synchronize().await.unwrap();

        assert_eq!(outcome, SyncOutcome::Applied { full: true, reset: true, changed: 1 });
        assert_eq!(api.calls(), vec![None]);
        let state = store.state();
        assert_eq!(state.internals.cid, "EF29");
        assert_eq!(state.internals.cache_version, 1);
        assert_eq!(state.internals.last_synchronised, at(9));
        assert!(!sync.is_synchronizing());
    }

    #[tokio::test]
    async fn test_incremental_sync_applies_delta() {
        let (store, api, sync) = setup(synced_state(
            "EF29",
            vec![event("e1", "Opening", 8), event("e2", "Old", 9), event("e3", "Dance", 12)],
        ));
        let mut response = SyncResponse::empty("EF29", at(13));
        response.events =
            DeltaPackage::delta(vec![event("e2", "New", 14)], vec!["e1".to_string()]);
        api.respond(Ok(response));

        let outcome = sync.synchronize().await.unwrap();

        assert_eq!(outcome, SyncOutcome::Applied { full: false, reset: false, changed: 1 });
        assert_eq!(api.calls(), vec![Some(at(6))]);
        assert_eq!(event_ids(&store), vec!["e3", "e2"]);
        assert_eq!(store.state().entities.events.get("e2").unwrap().title, "New");
        assert_eq!(store.state().internals.last_synchronised, at(13));
    }

    /// One record in every synchronized collection
    fn every_collection(cid: &str) -> SyncResponse {
        let changed = "2024-09-01T00:00:00Z";
        let replace = |record: serde_json::Value| {
            serde_json::json!({ "RemoveAllBeforeInsert": true, "ChangedEntities": [record] })
        };
        serde_json::from_value(serde_json::json!({
            "ConventionIdentifier": cid,
            "CurrentDateTimeUtc": "2024-09-20T12:00:00Z",
            "Announcements": replace(serde_json::json!({
                "Id": "a1", "LastChangeDateTimeUtc": changed, "Title": "Welcome",
                "ValidFromDateTimeUtc": changed, "ValidUntilDateTimeUtc": "2024-09-30T00:00:00Z"
            })),
            "Dealers": replace(serde_json::json!({ "Id": "d1", "LastChangeDateTimeUtc": changed })),
            "Images": replace(serde_json::json!({ "Id": "i1", "LastChangeDateTimeUtc": changed })),
            "Events": replace(serde_json::json!({
                "Id": "x1", "LastChangeDateTimeUtc": changed, "Title": "Last year",
                "StartDateTimeUtc": "2024-09-18T10:00:00Z", "EndDateTimeUtc": "2024-09-18T11:00:00Z"
            })),
            "EventConferenceDays": replace(serde_json::json!({
                "Id": "day1", "LastChangeDateTimeUtc": changed, "Name": "Wednesday", "Date": "2024-09-18"
            })),
            "EventConferenceRooms": replace(serde_json::json!({
                "Id": "r1", "LastChangeDateTimeUtc": changed, "Name": "Main Stage"
            })),
            "EventConferenceTracks": replace(serde_json::json!({
                "Id": "t1", "LastChangeDateTimeUtc": changed, "Name": "Art"
            })),
            "KnowledgeGroups": replace(serde_json::json!({
                "Id": "g1", "LastChangeDateTimeUtc": changed, "Name": "General"
            })),
            "KnowledgeEntries": replace(serde_json::json!({
                "Id": "k1", "LastChangeDateTimeUtc": changed, "KnowledgeGroupId": "g1", "Title": "Badges"
            })),
            "Maps": replace(serde_json::json!({
                "Id": "m1", "LastChangeDateTimeUtc": changed, "ImageId": "i1"
            }))
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_convention_resets_collections() {
        let store = Store::new(StoreData::default());
        let api = Arc::new(ScriptedApi::default());
        api.respond(Ok(every_collection("EF28")));
        Synchronizer::new(store.clone(), api.clone(), "EF28", 1).synchronize().await.unwrap();
        for key in EntityKey::SYNCHRONIZED {
            assert_eq!(store.state().entities.len_of(key), 1, "{key:?} not seeded");
        }

        let mut response = SyncResponse::empty("EF29", at(9));
        response.events = DeltaPackage::delta(vec![event("n1", "This year", 10)], vec![]);
        api.respond(Ok(response));
        let sync = Synchronizer::new(store.clone(), api.clone(), "EF29", 1);

        let outcome = sync.synchronize().await.unwrap();

        assert_eq!(outcome, SyncOutcome::Applied { full: true, reset: true, changed: 1 });
        assert_eq!(api.calls(), vec![None, None]);
        let state = store.state();
        assert_eq!(state.internals.cid, "EF29");
        assert_eq!(event_ids(&store), vec!["n1"]);
        assert_eq!(state.entities.total(), 1);
    }

    #[tokio::test]
    async fn test_reset_discards_running_call() {
        let (store, api, sync) = setup(synced_state("EF29", vec![event("e1", "Opening", 10)]));
        let mut delta = SyncResponse::empty("EF29", at(13));
        delta.events = DeltaPackage::delta(vec![event("e2", "Late", 14)], vec![]);
        let release = api.respond_when_released(Ok(delta));

        let call = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.synchronize().await })
        };
        while api.calls().is_empty() {
            tokio::task::yield_now().await;
        }

        sync.reset();
        let _ = release.send(());

        assert_eq!(call.await.unwrap().unwrap(), SyncOutcome::Superseded);
        assert!(!sync.is_synchronizing());
        let state = store.state();
        assert_eq!(state.entities.total(), 0);
        assert!(!state.internals.has_synchronised());

        // The next call plans from the cleared state
        api.respond(Ok(SyncResponse::empty("EF29", at(14))));
        sync.synchronize().await.unwrap();
        assert_eq!(api.calls(), vec![Some(at(6)), None]);
    }

    #[tokio::test]
    async fn test_cache_version_mismatch_forces_full_reset() {
        let mut initial = synced_state("EF29", vec![event("e1", "Stale shape", 10)]);
        initial.internals.cache_version = 0;
        let (store, api, sync) = setup(initial);
        api.respond(Ok(SyncResponse::empty("EF29", at(9))));

        let outcome = sync.synchronize().await.unwrap();

        assert_eq!(outcome, SyncOutcome::Applied { full: true, reset: true, changed: 0 });
        assert!(store.state().entities.events.is_empty());
        assert_eq!(store.state().internals.cache_version, 1);
    }

    #[tokio::test]
    async fn test_failed_sync_leaves_state_untouched() {
        let (store, api, sync) = setup(synced_state("EF29", vec![event("e1", "Opening", 10)]));
        api.respond(Err(ApiError::Status { status: 503, body: "down".to_string() }));
        let before = store.state();

        let result = sync.synchronize().await;

        assert!(matches!(result, Err(SyncError::Api(ApiError::Status { status: 503, .. }))));
        assert!(Arc::ptr_eq(&before, &store.state()));
        assert!(!sync.is_synchronizing());
    }

    #[tokio::test]
    async fn test_overlapping_calls_commit_only_latest() {
        let (store, api, sync) = setup(StoreData::default());

        let mut stale = SyncResponse::empty("EF29", at(9));
        stale.events = DeltaPackage::replace(vec![event("old", "Stale", 10)]);
        let release = api.respond_when_released(Ok(stale));

        let mut fresh = SyncResponse::empty("EF29", at(10));
        fresh.events = DeltaPackage::replace(vec![event("new", "Fresh", 10)]);
        api.respond(Ok(fresh));

        let first = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.synchronize().await })
        };
        while api.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(sync.is_synchronizing());

        let second = sync.synchronize().await.unwrap();
        assert!(matches!(second, SyncOutcome::Applied { .. }));
        assert!(!sync.is_synchronizing());

        let _ = release.send(());
        let first = first.await.unwrap().unwrap();

        assert_eq!(first, SyncOutcome::Superseded);
        assert_eq!(event_ids(&store), vec!["new"]);
        assert_eq!(store.state().internals.last_synchronised, at(10));
        assert!(!sync.is_synchronizing());
    }

    #[tokio::test]
    async fn test_busy_flag_stays_set_while_newer_call_runs() {
        let (_store, api, sync) = setup(StoreData::default());
        let release_first = api.respond_when_released(Ok(SyncResponse::empty("EF29", at(9))));
        let release_second = api.respond_when_released(Ok(SyncResponse::empty("EF29", at(10))));
        let mut busy = sync.subscribe_synchronizing();

        let first = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.synchronize().await })
        };
        while api.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        let second = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.synchronize().await })
        };
        while api.calls().len() < 2 {
            tokio::task::yield_now().await;
        }

        let _ = release_first.send(());
        assert_eq!(first.await.unwrap().unwrap(), SyncOutcome::Superseded);
        assert!(*busy.borrow_and_update());

        let _ = release_second.send(());
        assert!(matches!(second.await.unwrap().unwrap(), SyncOutcome::Applied { .. }));
        assert!(!*busy.borrow_and_update());
    }

    #[tokio::test]
    async fn test_dropped_call_releases_busy_flag() {
        let (store, api, sync) = setup(StoreData::default());
        let _release = api.respond_when_released(Ok(SyncResponse::empty("EF29", at(9))));
        let before = store.state();

        let call = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.synchronize().await })
        };
        while api.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(sync.is_synchronizing());

        call.abort();
        let _ = call.await;

        assert!(!sync.is_synchronizing());
        assert!(Arc::ptr_eq(&before, &store.state()));
    }

    #[tokio::test]
    async fn test_synchronize_communications_replaces_inbox() {
        let store = Store::new(StoreData::default());
        let message = |id: &str, hour| CommunicationRecord {
            id: id.to_string(),
            last_change_date_time_utc: at(hour),
            recipient_uid: "u1".to_string(),
            author_name: "Con Ops".to_string(),
            subject: id.to_string(),
            message: String::new(),
            created_date_time_utc: at(hour),
            received_date_time_utc: None,
            read_date_time_utc: None,
        };
        let api = Arc::new(ScriptedApi {
            messages: vec![message("m1", 8), message("m2", 9)],
            ..Default::default()
        });
        let sync = Synchronizer::new(store.clone(), api, "EF29", 1);

        let count = sync.synchronize_communications("token").await.unwrap();

        assert_eq!(count, 2);
        let ids: Vec<String> =
            store.state().entities.communications.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);
    }
}
