use serde::{Deserialize, Serialize};

/// Rules for deriving behavioral metrics from raw PostHog events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricRules {
    /// Event names counted by `creation_count`
    pub creation_events: Vec<String>,
    pub view_events: Vec<String>,
    pub join_events: Vec<String>,
    pub invite_events: Vec<String>,
    pub quiz_start_events: Vec<String>,
    /// Presence of any of these marks the quiz as completed
    pub quiz_completion_events: Vec<String>,

    /// `$screen_name` value of the Discover tab
    pub discover_screen: String,

    /// Touch coordinate property keys; the vertical one feeds scroll depth
    pub horizontal_coordinate_key: String,
    pub vertical_coordinate_key: String,

    /// Only events captured by this SDK are kept (`$lib`); `None` keeps all
    pub allowed_lib: Option<String>,

    /// Internal and test accounts dropped before aggregation
    pub excluded_distinct_ids: Vec<String>,
}

impl Default for MetricRules {
    fn default() -> Self {
        Self {
            creation_events: vec!["creation".into(), "create_event".into()],
            view_events: vec!["view_event".into()],
            join_events: vec!["join_event".into()],
            invite_events: vec![
                "invite_friends".into(),
                "send_invite_to_event".into(),
                "invite_friends_for_report".into(),
            ],
            quiz_start_events: vec!["start_quiz".into()],
            quiz_completion_events: vec!["finish_quiz".into()],
            discover_screen: "Discover".into(),
            horizontal_coordinate_key: "$touch_x".into(),
            vertical_coordinate_key: "$touch_y".into(),
            allowed_lib: Some("posthog-react-native".into()),
            excluded_distinct_ids: Vec::new(),
        }
    }
}

impl MetricRules {
    pub fn is_excluded(&self, distinct_id: &str) -> bool {
        self.excluded_distinct_ids.iter().any(|id| id == distinct_id)
    }

    /// Contact-permission events are matched loosely: any name containing
    /// both "contact" and "enable".
    pub fn is_enable_contacts(event_type: &str) -> bool {
        let lower = event_type.to_ascii_lowercase();
        lower.contains("contact") && lower.contains("enable")
    }
}

pub(crate) fn matches(names: &[String], event_type: &str) -> bool {
    names.iter().any(|name| name == event_type)
}
