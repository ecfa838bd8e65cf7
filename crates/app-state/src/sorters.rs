//! Canonical order of each entity collection
//!
//! Every record type implements [`Entity`] here; `compare` is the
//! collection's comparator. Ties always fall back to the id so the order is
//! total and independent of arrival order.

use std::cmp::Ordering;

use api_client::{
    AnnouncementRecord, CommunicationRecord, DealerRecord, EventDayRecord, EventRecord,
    EventRoomRecord, EventTrackRecord, ImageRecord, KnowledgeEntryRecord, KnowledgeGroupRecord,
    MapRecord,
};

use crate::entity_store::Entity;

/// Case-insensitive comparison used for names
fn cmp_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

// Newest first.
impl Entity for AnnouncementRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        b.valid_from_date_time_utc
            .cmp(&a.valid_from_date_time_utc)
            .then_with(|| a.id.cmp(&b.id))
    }
}

impl Entity for DealerRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        cmp_names(a.full_name(), b.full_name()).then_with(|| a.id.cmp(&b.id))
    }
}

impl Entity for ImageRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        a.id.cmp(&b.id)
    }
}

// Schedule order: start, then end, then title.
impl Entity for EventRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        a.start_date_time_utc
            .cmp(&b.start_date_time_utc)
            .then_with(|| a.end_date_time_utc.cmp(&b.end_date_time_utc))
            .then_with(|| cmp_names(&a.title, &b.title))
            .then_with(|| a.id.cmp(&b.id))
    }
}

impl Entity for EventDayRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id))
    }
}

impl Entity for EventRoomRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        cmp_names(&a.name, &b.name).then_with(|| a.id.cmp(&b.id))
    }
}

impl Entity for EventTrackRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        cmp_names(&a.name, &b.name).then_with(|| a.id.cmp(&b.id))
    }
}

impl Entity for KnowledgeGroupRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        a.order
            .cmp(&b.order)
            .then_with(|| cmp_names(&a.name, &b.name))
            .then_with(|| a.id.cmp(&b.id))
    }
}

impl Entity for KnowledgeEntryRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        a.order
            .cmp(&b.order)
            .then_with(|| cmp_names(&a.title, &b.title))
            .then_with(|| a.id.cmp(&b.id))
    }
}

impl Entity for MapRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        a.order
            .cmp(&b.order)
            .then_with(|| cmp_names(&a.description, &b.description))
            .then_with(|| a.id.cmp(&b.id))
    }
}

// Newest first.
impl Entity for CommunicationRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn compare(a: &Self, b: &Self) -> Ordering {
        b.created_date_time_utc
            .cmp(&a.created_date_time_utc)
            .then_with(|| a.id.cmp(&b.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_store::EntityStore;
    use chrono::{TimeZone, Utc};

    fn dealer(id: &str, display_name: &str, nickname: &str) -> DealerRecord {
        DealerRecord {
            id: id.to_string(),
            last_change_date_time_utc: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            display_name: display_name.to_string(),
            attendee_nickname: nickname.to_string(),
            short_description: String::new(),
            categories: vec![],
            is_after_dark: false,
            artist_image_id: None,
        }
    }

    #[test]
    fn test_dealers_sort_by_shown_name_case_insensitive() {
        let store = EntityStore::from_entities(vec![
            dealer("1", "zebra", ""),
            dealer("2", "", "Aardvark"),
            dealer("3", "Mongoose", ""),
        ]);

        let names: Vec<&str> = store.iter().map(|d| d.full_name()).collect();
        assert_eq!(names, vec!["Aardvark", "Mongoose", "zebra"]);
    }

    #[test]
    fn test_announcements_newest_first() {
        let at = |day| Utc.with_ymd_and_hms(2025, 9, day, 12, 0, 0).unwrap();
        let announcement = |id: &str, day| AnnouncementRecord {
            id: id.to_string(),
            last_change_date_time_utc: at(1),
            valid_from_date_time_utc: at(day),
            valid_until_date_time_utc: at(28),
            area: String::new(),
            author: String::new(),
            title: id.to_string(),
            content: String::new(),
            image_id: None,
        };

        let store = EntityStore::from_entities(vec![announcement("old", 1), announcement("new", 5)]);
        let ids: Vec<&str> = store.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_ties_fall_back_to_id() {
        let a = dealer("b", "Same", "");
        let b = dealer("a", "Same", "");

        assert_eq!(DealerRecord::compare(&a, &b), Ordering::Greater);
    }
}
