//! Scalar values owned by the application
//!
//! Values are not part of the synchronization protocol; other subsystems
//! set and remove them directly through the cache facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Color theme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Follow system color scheme
    #[default]
    System,
    /// Always use light mode
    Light,
    /// Always use dark mode
    Dark,
}

/// User settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Color theme
    #[serde(default)]
    pub theme: Theme,

    /// Preferred language code, if overridden
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Whether analytics are enabled
    #[serde(default)]
    pub analytics_enabled: bool,

    /// Whether events tagged "internal" are listed
    #[serde(default)]
    pub show_internal_events: bool,

    /// Events hidden from the schedule
    #[serde(default)]
    pub hidden_events: Vec<String>,

    /// Favorited dealers
    #[serde(default)]
    pub favorite_dealers: Vec<String>,

    /// Offset applied to "now" for testing schedules, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_travel_offset_ms: Option<i64>,
}

/// Kind of record a local notification refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Event reminder
    EventReminder,
    /// Announcement
    Announcement,
}

/// A notification scheduled on the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledNotification {
    /// Id of the record the notification is about
    pub record_id: String,
    /// Kind of record
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// When it was created
    pub date_created_utc: DateTime<Utc>,
    /// When it fires
    pub date_scheduled_utc: DateTime<Utc>,
}

/// Name of a value slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKey {
    /// [`Settings`]
    Settings,
    /// Scheduled notifications
    Notifications,
}

impl ValueKey {
    /// All value keys
    pub const ALL: [ValueKey; 2] = [ValueKey::Settings, ValueKey::Notifications];

    /// Storage name of the value
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKey::Settings => "settings",
            ValueKey::Notifications => "notifications",
        }
    }
}

impl fmt::Display for ValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value together with its slot
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    /// User settings
    Settings(Settings),
    /// Scheduled notifications
    Notifications(Vec<ScheduledNotification>),
}

impl StoreValue {
    /// Slot this value belongs in
    pub fn key(&self) -> ValueKey {
        match self {
            StoreValue::Settings(_) => ValueKey::Settings,
            StoreValue::Notifications(_) => ValueKey::Notifications,
        }
    }
}
