//! Raw records extracted from the PostHog and Firebase sources.
//!
//! Sources hand back schema-agnostic rows; the aggregator parses them into
//! these typed records before deriving any metric.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One tabular row as returned by a source: column name -> value.
pub type Row = Map<String, Value>;

/// Open key/value bag of event-specific fields (`$session_id`, `$touch_y`, ...).
pub type Properties = Map<String, Value>;

/// A single PostHog user action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    pub session_id: String,
    /// PostHog `distinct_id` of the actor.
    pub user_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub properties: Properties,
}

impl RawEvent {
    pub fn property_str(&self, key: &str) -> Option<&str> {
        property_str(&self.properties, key)
    }

    pub fn property_f64(&self, key: &str) -> Option<f64> {
        property_f64(&self.properties, key)
    }
}

/// Non-empty string value of a property, if any.
pub fn property_str<'a>(properties: &'a Properties, key: &str) -> Option<&'a str> {
    match properties.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    }
}

/// Numeric value of a property. Numeric strings are accepted, anything else is absent.
pub fn property_f64(properties: &Properties, key: &str) -> Option<f64> {
    match properties.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// PostHog session record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RawSession {
    pub session_id: String,
    pub distinct_id: Option<String>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub session_duration: Option<f64>,
    pub autocapture_count: Option<u64>,
    pub screen_count: Option<u64>,
    pub device_type: Option<String>,
    pub os: Option<String>,
}

/// Firebase user profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FirebaseUser {
    pub user_id: String,
    pub phone_number: Option<String>,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub contact_access_granted: Option<bool>,
    pub business_user: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

impl FirebaseUser {
    /// Number of optional profile fields that carry a value; used to pick
    /// the most complete duplicate.
    pub fn completeness(&self) -> usize {
        [
            self.email.is_some(),
            self.username.is_some(),
            self.created_at.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}

/// Firebase-side app event (an event a user created in the product).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirebaseEvent {
    pub user_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Identifies one of the four extraction queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
    PosthogEvents,
    PosthogSessions,
    FirebaseUsers,
    FirebaseEvents,
}

impl SourceTable {
    pub const ALL: [SourceTable; 4] = [
        SourceTable::PosthogEvents,
        SourceTable::PosthogSessions,
        SourceTable::FirebaseUsers,
        SourceTable::FirebaseEvents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTable::PosthogEvents => "posthog_events",
            SourceTable::PosthogSessions => "posthog_sessions",
            SourceTable::FirebaseUsers => "firebase_users",
            SourceTable::FirebaseEvents => "firebase_events",
        }
    }
}

impl std::fmt::Display for SourceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw rows of all four queries for one extraction window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedTables {
    pub posthog_events: Vec<Row>,
    pub posthog_sessions: Vec<Row>,
    pub firebase_users: Vec<Row>,
    pub firebase_events: Vec<Row>,
}

impl ExtractedTables {
    pub fn insert(&mut self, table: SourceTable, rows: Vec<Row>) {
        match table {
            SourceTable::PosthogEvents => self.posthog_events = rows,
            SourceTable::PosthogSessions => self.posthog_sessions = rows,
            SourceTable::FirebaseUsers => self.firebase_users = rows,
            SourceTable::FirebaseEvents => self.firebase_events = rows,
        }
    }

    pub fn rows(&self, table: SourceTable) -> &[Row] {
        match table {
            SourceTable::PosthogEvents => &self.posthog_events,
            SourceTable::PosthogSessions => &self.posthog_sessions,
            SourceTable::FirebaseUsers => &self.firebase_users,
            SourceTable::FirebaseEvents => &self.firebase_events,
        }
    }

    pub fn row_counts(&self) -> BTreeMap<String, usize> {
        SourceTable::ALL
            .iter()
            .map(|table| (table.as_str().to_string(), self.rows(*table).len()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        SourceTable::ALL.iter().all(|table| self.rows(*table).is_empty())
    }
}
