//! Store reducer
//!
//! [`reduce`] is the only transition function over [`StoreData`]. It is pure:
//! it never mutates its input, and it returns the input `Arc` itself when an
//! action changes nothing, so "no change" is observable as pointer equality.

use std::sync::Arc;

use api_client::{
    AnnouncementRecord, CommunicationRecord, DealerRecord, EventDayRecord, EventRecord,
    EventRoomRecord, EventTrackRecord, ImageRecord, KnowledgeEntryRecord, KnowledgeGroupRecord,
    MapRecord,
};

use crate::entity_store::{apply_change, Entity, EntityChange, EntityStore};
use crate::store::{EntityKey, InternalsPatch, StoreData};
use crate::values::{StoreValue, ValueKey};

/// A batch change against one named collection
#[derive(Debug, Clone, PartialEq)]
pub enum EntitiesChange {
    /// Announcements
    Announcements(EntityChange<AnnouncementRecord>),
    /// Dealers
    Dealers(EntityChange<DealerRecord>),
    /// Images
    Images(EntityChange<ImageRecord>),
    /// Events
    Events(EntityChange<EventRecord>),
    /// Conference days
    EventDays(EntityChange<EventDayRecord>),
    /// Conference rooms
    EventRooms(EntityChange<EventRoomRecord>),
    /// Conference tracks
    EventTracks(EntityChange<EventTrackRecord>),
    /// Knowledge base groups
    KnowledgeGroups(EntityChange<KnowledgeGroupRecord>),
    /// Knowledge base entries
    KnowledgeEntries(EntityChange<KnowledgeEntryRecord>),
    /// Maps
    Maps(EntityChange<MapRecord>),
    /// Private messages
    Communications(EntityChange<CommunicationRecord>),
}

impl EntitiesChange {
    /// Collection the change targets
    pub fn key(&self) -> EntityKey {
        match self {
            EntitiesChange::Announcements(_) => EntityKey::Announcements,
            EntitiesChange::Dealers(_) => EntityKey::Dealers,
            EntitiesChange::Images(_) => EntityKey::Images,
            EntitiesChange::Events(_) => EntityKey::Events,
            EntitiesChange::EventDays(_) => EntityKey::EventDays,
            EntitiesChange::EventRooms(_) => EntityKey::EventRooms,
            EntitiesChange::EventTracks(_) => EntityKey::EventTracks,
            EntitiesChange::KnowledgeGroups(_) => EntityKey::KnowledgeGroups,
            EntitiesChange::KnowledgeEntries(_) => EntityKey::KnowledgeEntries,
            EntitiesChange::Maps(_) => EntityKey::Maps,
            EntitiesChange::Communications(_) => EntityKey::Communications,
        }
    }

    /// Check if the change carries nothing
    pub fn is_empty(&self) -> bool {
        match self {
            EntitiesChange::Announcements(c) => c.is_empty(),
            EntitiesChange::Dealers(c) => c.is_empty(),
            EntitiesChange::Images(c) => c.is_empty(),
            EntitiesChange::Events(c) => c.is_empty(),
            EntitiesChange::EventDays(c) => c.is_empty(),
            EntitiesChange::EventRooms(c) => c.is_empty(),
            EntitiesChange::EventTracks(c) => c.is_empty(),
            EntitiesChange::KnowledgeGroups(c) => c.is_empty(),
            EntitiesChange::KnowledgeEntries(c) => c.is_empty(),
            EntitiesChange::Maps(c) => c.is_empty(),
            EntitiesChange::Communications(c) => c.is_empty(),
        }
    }
}

/// Store transitions
#[derive(Debug, Clone)]
pub enum StoreAction {
    /// Shallow-merge internals
    InternalsSet(InternalsPatch),
    /// Replace one value slot
    ValueSet(StoreValue),
    /// Remove one value slot
    ValueDelete(ValueKey),
    /// Batch change against one collection
    EntitiesChange(EntitiesChange),
    /// Replace the whole state
    Reset(Box<StoreData>),
}

/// Compute the state following `action`
pub fn reduce(state: &Arc<StoreData>, action: StoreAction) -> Arc<StoreData> {
    match action {
        StoreAction::InternalsSet(patch) => {
            if patch.is_empty() {
                return Arc::clone(state);
            }
            let mut next = StoreData::clone(state);
            if let Some(cid) = patch.cid {
                next.internals.cid = cid;
            }
            if let Some(cache_version) = patch.cache_version {
                next.internals.cache_version = cache_version;
            }
            if let Some(last_synchronised) = patch.last_synchronised {
                next.internals.last_synchronised = last_synchronised;
            }
            Arc::new(next)
        }

        StoreAction::ValueSet(value) => {
            let mut next = StoreData::clone(state);
            match value {
                StoreValue::Settings(settings) => next.values.settings = Some(Arc::new(settings)),
                StoreValue::Notifications(notifications) => {
                    next.values.notifications = Some(Arc::new(notifications))
                }
            }
            Arc::new(next)
        }

        StoreAction::ValueDelete(key) => {
            let present = match key {
                ValueKey::Settings => state.values.settings.is_some(),
                ValueKey::Notifications => state.values.notifications.is_some(),
            };
            if !present {
                return Arc::clone(state);
            }
            let mut next = StoreData::clone(state);
            match key {
                ValueKey::Settings => next.values.settings = None,
                ValueKey::Notifications => next.values.notifications = None,
            }
            Arc::new(next)
        }

        StoreAction::EntitiesChange(change) => {
            if change.is_empty() {
                return Arc::clone(state);
            }
            let mut next = StoreData::clone(state);
            let entities = &mut next.entities;
            let changed = match change {
                EntitiesChange::Announcements(c) => apply_into(&mut entities.announcements, c),
                EntitiesChange::Dealers(c) => apply_into(&mut entities.dealers, c),
                EntitiesChange::Images(c) => apply_into(&mut entities.images, c),
                EntitiesChange::Events(c) => apply_into(&mut entities.events, c),
                EntitiesChange::EventDays(c) => apply_into(&mut entities.event_days, c),
                EntitiesChange::EventRooms(c) => apply_into(&mut entities.event_rooms, c),
                EntitiesChange::EventTracks(c) => apply_into(&mut entities.event_tracks, c),
                EntitiesChange::KnowledgeGroups(c) => apply_into(&mut entities.knowledge_groups, c),
                EntitiesChange::KnowledgeEntries(c) => {
                    apply_into(&mut entities.knowledge_entries, c)
                }
                EntitiesChange::Maps(c) => apply_into(&mut entities.maps, c),
                EntitiesChange::Communications(c) => apply_into(&mut entities.communications, c),
            };
            if changed {
                Arc::new(next)
            } else {
                Arc::clone(state)
            }
        }

        StoreAction::Reset(data) => Arc::new(*data),
    }
}

/// Apply a change in place; returns whether the collection was replaced
fn apply_into<T: Entity>(slot: &mut Arc<EntityStore<T>>, change: EntityChange<T>) -> bool {
    let next = apply_change(slot, change);
    if Arc::ptr_eq(slot, &next) {
        false
    } else {
        *slot = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::Settings;
    use chrono::{TimeZone, Utc};

    fn track(id: &str, name: &str) -> EventTrackRecord {
        EventTrackRecord {
            id: id.to_string(),
            last_change_date_time_utc: Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap(),
            name: name.to_string(),
        }
    }

    fn seeded() -> Arc<StoreData> {
        let state = Arc::new(StoreData::default());
        reduce(
            &state,
            StoreAction::EntitiesChange(EntitiesChange::EventTracks(EntityChange::replace_all(vec![
                track("t1", "Art"),
                track("t2", "Music"),
            ]))),
        )
    }

    #[test]
    fn test_internals_set_merges_shallowly() {
        let state = Arc::new(StoreData::default());
        let next = reduce(
            &state,
            StoreAction::InternalsSet(InternalsPatch {
                cid: Some("EF29".to_string()),
                ..Default::default()
            }),
        );

        assert_eq!(next.internals.cid, "EF29");
        assert_eq!(next.internals.cache_version, 0);
        assert!(!next.internals.has_synchronised());
        // Collections are shared, not copied
        assert!(Arc::ptr_eq(&state.entities.events, &next.entities.events));
    }

    #[test]
    fn test_value_set_and_delete() {
        let state = Arc::new(StoreData::default());
        let settings = Settings { show_internal_events: true, ..Default::default() };

        let next = reduce(&state, StoreAction::ValueSet(StoreValue::Settings(settings.clone())));
        assert_eq!(next.values.settings.as_deref(), Some(&settings));

        let deleted = reduce(&next, StoreAction::ValueDelete(ValueKey::Settings));
        assert!(deleted.values.settings.is_none());
        assert!(deleted.values.notifications.is_some());

        let again = reduce(&deleted, StoreAction::ValueDelete(ValueKey::Settings));
        assert!(Arc::ptr_eq(&deleted, &again));
    }

    #[test]
    fn test_entities_change_replaces_only_target_collection() {
        let state = seeded();
        let next = reduce(
            &state,
            StoreAction::EntitiesChange(EntitiesChange::EventTracks(EntityChange::incremental(
                vec!["t1".to_string()],
                vec![],
            ))),
        );

        assert_eq!(next.entities.event_tracks.len(), 1);
        assert!(!Arc::ptr_eq(&state.entities.event_tracks, &next.entities.event_tracks));
        assert!(Arc::ptr_eq(&state.entities.events, &next.entities.events));
        assert!(Arc::ptr_eq(&state.entities.dealers, &next.entities.dealers));
    }

    #[test]
    fn test_empty_entities_change_returns_same_state() {
        let state = seeded();
        let next = reduce(
            &state,
            StoreAction::EntitiesChange(EntitiesChange::EventTracks(EntityChange::default())),
        );

        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn test_reset_replaces_everything() {
        let state = seeded();
        let next = reduce(&state, StoreAction::Reset(Box::default()));

        assert_eq!(next.entities.total(), 0);
        assert_eq!(state.entities.event_tracks.len(), 2);
    }

    #[test]
    fn test_entities_change_key() {
        let change = EntitiesChange::Maps(EntityChange::default());
        assert_eq!(change.key(), EntityKey::Maps);
        assert!(change.is_empty());
    }
}
