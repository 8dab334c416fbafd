//! Session-level output rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of `sessions_aggregated`, keyed by `session_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AggregatedSession {
    pub session_id: String,
    /// PostHog `distinct_id` of the session owner.
    pub distinct_id: Option<String>,
    /// Resolved Firebase `user_id`; `None` when no user matched.
    pub user_id: Option<String>,

    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub session_duration: Option<f64>,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,

    pub city: Option<String>,
    pub country: Option<String>,
    pub device_type: Option<String>,
    pub os: Option<String>,

    pub event_count: u64,
    pub event_type_counts: BTreeMap<String, u64>,
    pub creation_count: u64,
    pub created_event: bool,
    pub viewed_event: bool,
    pub joined_event: bool,
    pub invited_someone: bool,
    pub enabled_contacts: bool,
    pub scrolled: bool,
    pub visited_discover: bool,
    pub scroll_event_count: u64,
    pub scroll_depth: Option<f64>,
    pub started_quiz: bool,
    pub completed_quiz: bool,
    pub autocapture_count: Option<u64>,
    pub screen_count: Option<u64>,

    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub contact_access_granted: Option<bool>,
    pub business_user: Option<bool>,
    pub user_created_at: Option<DateTime<Utc>>,

    #[serde(rename = "_loaded_at")]
    pub loaded_at: Option<DateTime<Utc>>,
}

impl AggregatedSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }
}
