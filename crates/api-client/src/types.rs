//! Wire types of the synchronization endpoint
//!
//! Field names follow the backend's PascalCase JSON. Every record carries a
//! string `Id` that is unique within its collection.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Sync Envelope
// =============================================================================

/// Change set for one collection
///
/// When `remove_all_before_insert` is set, the collection is replaced by
/// `changed_entities` and `deleted_entities` is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct DeltaPackage<T> {
    /// Drop every local record before inserting the changed ones
    #[serde(default)]
    pub remove_all_before_insert: bool,
    /// Added or changed records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_entities: Option<Vec<T>>,
    /// Ids of deleted records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_entities: Option<Vec<String>>,
}

impl<T> Default for DeltaPackage<T> {
    fn default() -> Self {
        Self { remove_all_before_insert: false, changed_entities: None, deleted_entities: None }
    }
}

impl<T> DeltaPackage<T> {
    /// Full replacement with the given records
    pub fn replace(entities: Vec<T>) -> Self {
        Self { remove_all_before_insert: true, changed_entities: Some(entities), deleted_entities: None }
    }

    /// Incremental change
    pub fn delta(changed: Vec<T>, deleted: Vec<String>) -> Self {
        Self {
            remove_all_before_insert: false,
            changed_entities: Some(changed),
            deleted_entities: Some(deleted),
        }
    }
}

/// Response of `GET {apiBase}/Sync`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncResponse {
    /// Dataset identity reported by the server
    pub convention_identifier: String,
    /// Server time, becomes the next `since`
    pub current_date_time_utc: DateTime<Utc>,
    /// Events
    #[serde(default)]
    pub events: DeltaPackage<EventRecord>,
    /// Conference days
    #[serde(default)]
    pub event_conference_days: DeltaPackage<EventDayRecord>,
    /// Conference rooms
    #[serde(default)]
    pub event_conference_rooms: DeltaPackage<EventRoomRecord>,
    /// Conference tracks
    #[serde(default)]
    pub event_conference_tracks: DeltaPackage<EventTrackRecord>,
    /// Knowledge base groups
    #[serde(default)]
    pub knowledge_groups: DeltaPackage<KnowledgeGroupRecord>,
    /// Knowledge base entries
    #[serde(default)]
    pub knowledge_entries: DeltaPackage<KnowledgeEntryRecord>,
    /// Dealers
    #[serde(default)]
    pub dealers: DeltaPackage<DealerRecord>,
    /// Images
    #[serde(default)]
    pub images: DeltaPackage<ImageRecord>,
    /// Announcements
    #[serde(default)]
    pub announcements: DeltaPackage<AnnouncementRecord>,
    /// Maps
    #[serde(default)]
    pub maps: DeltaPackage<MapRecord>,
}

impl SyncResponse {
    /// Response with no changes in any collection
    pub fn empty(convention_identifier: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            convention_identifier: convention_identifier.into(),
            current_date_time_utc: now,
            events: DeltaPackage::default(),
            event_conference_days: DeltaPackage::default(),
            event_conference_rooms: DeltaPackage::default(),
            event_conference_tracks: DeltaPackage::default(),
            knowledge_groups: DeltaPackage::default(),
            knowledge_entries: DeltaPackage::default(),
            dealers: DeltaPackage::default(),
            images: DeltaPackage::default(),
            announcements: DeltaPackage::default(),
            maps: DeltaPackage::default(),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnnouncementRecord {
    /// Id
    pub id: String,
    /// Last change on the server
    pub last_change_date_time_utc: DateTime<Utc>,
    /// Start of validity
    pub valid_from_date_time_utc: DateTime<Utc>,
    /// End of validity
    pub valid_until_date_time_utc: DateTime<Utc>,
    /// Area, e.g. "Events"
    #[serde(default)]
    pub area: String,
    /// Author
    #[serde(default)]
    pub author: String,
    /// Title
    pub title: String,
    /// Markdown content
    #[serde(default)]
    pub content: String,
    /// Attached image
    #[serde(default)]
    pub image_id: Option<String>,
}

/// Dealer in the dealers' den
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealerRecord {
    /// Id
    pub id: String,
    /// Last change on the server
    pub last_change_date_time_utc: DateTime<Utc>,
    /// Display name, may be empty
    #[serde(default)]
    pub display_name: String,
    /// Attendee nickname, used when there is no display name
    #[serde(default)]
    pub attendee_nickname: String,
    /// Short description
    #[serde(default)]
    pub short_description: String,
    /// Categories
    #[serde(default)]
    pub categories: Vec<String>,
    /// Located in the after dark section
    #[serde(default)]
    pub is_after_dark: bool,
    /// Artist image
    #[serde(default)]
    pub artist_image_id: Option<String>,
}

impl DealerRecord {
    /// Name shown to users
    pub fn full_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.attendee_nickname
        } else {
            &self.display_name
        }
    }
}

/// Image metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageRecord {
    /// Id
    pub id: String,
    /// Last change on the server
    pub last_change_date_time_utc: DateTime<Utc>,
    /// Width in pixels
    #[serde(default)]
    pub width: u32,
    /// Height in pixels
    #[serde(default)]
    pub height: u32,
    /// Size in bytes
    #[serde(default)]
    pub size_in_bytes: u64,
    /// MIME type
    #[serde(default)]
    pub mime_type: String,
    /// Content hash, changes when the image changes
    #[serde(default)]
    pub content_hash_sha1: String,
    /// Download URL
    #[serde(default)]
    pub url: String,
}

/// Scheduled event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventRecord {
    /// Id
    pub id: String,
    /// Last change on the server
    pub last_change_date_time_utc: DateTime<Utc>,
    /// Title
    pub title: String,
    /// Subtitle
    #[serde(default)]
    pub sub_title: String,
    /// Short summary
    #[serde(rename = "Abstract", default)]
    pub summary: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Conference day
    #[serde(default)]
    pub conference_day_id: Option<String>,
    /// Conference track
    #[serde(default)]
    pub conference_track_id: Option<String>,
    /// Conference room
    #[serde(default)]
    pub conference_room_id: Option<String>,
    /// Start time
    pub start_date_time_utc: DateTime<Utc>,
    /// End time
    pub end_date_time_utc: DateTime<Utc>,
    /// Panel hosts
    #[serde(default)]
    pub panel_hosts: String,
    /// Changed after the printed conbook
    #[serde(default)]
    pub is_deviating_from_conbook: bool,
    /// Accepts feedback
    #[serde(default)]
    pub is_accepting_feedback: bool,
    /// Tags, e.g. "internal"
    #[serde(default)]
    pub tags: Vec<String>,
    /// Banner image
    #[serde(default)]
    pub banner_image_id: Option<String>,
    /// Poster image
    #[serde(default)]
    pub poster_image_id: Option<String>,
}

/// Conference day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventDayRecord {
    /// Id
    pub id: String,
    /// Last change on the server
    pub last_change_date_time_utc: DateTime<Utc>,
    /// Name, e.g. "Thursday"
    pub name: String,
    /// Calendar date
    pub date: NaiveDate,
}

/// Conference room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventRoomRecord {
    /// Id
    pub id: String,
    /// Last change on the server
    pub last_change_date_time_utc: DateTime<Utc>,
    /// Name
    pub name: String,
    /// Short name
    #[serde(default)]
    pub short_name: Option<String>,
}

/// Conference track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventTrackRecord {
    /// Id
    pub id: String,
    /// Last change on the server
    pub last_change_date_time_utc: DateTime<Utc>,
    /// Name
    pub name: String,
}

/// Knowledge base group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KnowledgeGroupRecord {
    /// Id
    pub id: String,
    /// Last change on the server
    pub last_change_date_time_utc: DateTime<Utc>,
    /// Name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Display order
    #[serde(default)]
    pub order: i32,
    /// Icon code point
    #[serde(default)]
    pub font_awesome_icon_character_unicode_address: Option<String>,
}

/// Knowledge base entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KnowledgeEntryRecord {
    /// Id
    pub id: String,
    /// Last change on the server
    pub last_change_date_time_utc: DateTime<Utc>,
    /// Owning group
    pub knowledge_group_id: String,
    /// Title
    pub title: String,
    /// Markdown text
    #[serde(default)]
    pub text: String,
    /// Display order within the group
    #[serde(default)]
    pub order: i32,
    /// Attached images
    #[serde(default)]
    pub image_ids: Vec<String>,
}

/// Clickable region on a map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapEntryRecord {
    /// Id
    pub id: String,
    /// X coordinate in image pixels
    pub x: i32,
    /// Y coordinate in image pixels
    pub y: i32,
    /// Tap radius in image pixels
    pub tap_radius: i32,
}

/// Venue map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapRecord {
    /// Id
    pub id: String,
    /// Last change on the server
    pub last_change_date_time_utc: DateTime<Utc>,
    /// Map image
    pub image_id: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Display order
    #[serde(default)]
    pub order: i32,
    /// Listed in the map browser
    #[serde(default)]
    pub is_browseable: bool,
    /// Regions
    #[serde(default)]
    pub entries: Vec<MapEntryRecord>,
}

/// Private message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommunicationRecord {
    /// Id
    pub id: String,
    /// Last change on the server
    pub last_change_date_time_utc: DateTime<Utc>,
    /// Recipient
    #[serde(default)]
    pub recipient_uid: String,
    /// Sender name
    #[serde(default)]
    pub author_name: String,
    /// Subject
    pub subject: String,
    /// Message body
    #[serde(default)]
    pub message: String,
    /// Creation time
    pub created_date_time_utc: DateTime<Utc>,
    /// Delivery time
    #[serde(default)]
    pub received_date_time_utc: Option<DateTime<Utc>>,
    /// Read time
    #[serde(default)]
    pub read_date_time_utc: Option<DateTime<Utc>>,
}
