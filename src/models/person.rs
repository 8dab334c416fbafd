use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of `people_aggregated`: a Firebase user's sessions rolled up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AggregatedPerson {
    pub user_id: String,
    pub total_sessions: u64,

    pub avg_session_duration: Option<f64>,
    pub median_session_duration: Option<f64>,
    pub total_session_duration: Option<f64>,
    pub min_session_duration: Option<f64>,
    pub max_session_duration: Option<f64>,
    pub std_session_duration: Option<f64>,

    pub created_event_sum: u64,
    pub viewed_event_sum: u64,
    pub joined_event_sum: u64,
    pub invited_someone_sum: u64,
    pub enabled_contacts_sum: u64,
    pub scrolled_sum: u64,
    pub visited_discover_sum: u64,
    pub started_quiz_sum: u64,
    pub completed_quiz_sum: u64,

    pub total_scrolls: u64,
    pub avg_scrolls_per_session: f64,
    pub max_scrolls_per_session: u64,
    pub total_autocaptures: u64,
    pub avg_autocaptures_per_session: Option<f64>,
    pub max_autocaptures_per_session: Option<u64>,
    pub total_screens: u64,
    pub avg_screens_per_session: Option<f64>,
    pub max_screens_per_session: Option<u64>,

    pub first_session_date: Option<DateTime<Utc>>,
    pub last_session_date: Option<DateTime<Utc>>,
    pub days_since_first_session: Option<f64>,
    pub sessions_per_day: Option<f64>,
    pub engagement_score: f64,

    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub contact_access_granted: Option<bool>,
    pub business_user: Option<bool>,
    pub user_created_at: Option<DateTime<Utc>>,
    pub city: Option<String>,
    pub country: Option<String>,

    #[serde(rename = "_loaded_at")]
    pub loaded_at: Option<DateTime<Utc>>,
}
