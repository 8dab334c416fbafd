//! Parsing of schema-agnostic source rows into typed records.
//!
//! Required identifiers are enforced here; every other column is optional and
//! parses to `None` when absent, null, or of an unexpected type.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::aggregation::config::MetricRules;
use crate::db::helpers::parse_source_timestamp;
use crate::error::EtlError;
use crate::models::{
    property_str, FirebaseEvent, FirebaseUser, Properties, RawEvent, RawSession, Row,
};

const SESSION_ID_PROPERTY: &str = "$session_id";
const LIB_PROPERTY: &str = "$lib";

/// Parses PostHog event rows, dropping those that are not attributable to a
/// session, belong to excluded accounts, or come from another SDK.
pub fn parse_events(rows: &[Row], rules: &MetricRules) -> Result<Vec<RawEvent>, EtlError> {
    let mut events = Vec::with_capacity(rows.len());

    for (idx, row) in rows.iter().enumerate() {
        let user_id = required_text(row, "distinct_id", "posthog event", idx)?;
        let event_type = required_text(row, "event", "posthog event", idx)?;
        let timestamp = row
            .get("timestamp")
            .and_then(parse_source_timestamp)
            .ok_or_else(|| {
                EtlError::aggregation(format!(
                    "posthog event row {idx} has no parseable timestamp"
                ))
            })?;
        let properties = parse_properties(row.get("properties"), idx)?;

        if rules.is_excluded(&user_id) {
            continue;
        }
        if let Some(lib) = &rules.allowed_lib {
            if property_str(&properties, LIB_PROPERTY) != Some(lib.as_str()) {
                continue;
            }
        }
        let Some(session_id) = property_text(&properties, SESSION_ID_PROPERTY) else {
            continue;
        };

        events.push(RawEvent {
            session_id,
            user_id,
            event_type,
            timestamp,
            properties,
        });
    }

    Ok(events)
}

/// Parses PostHog session rows, dropping excluded accounts.
pub fn parse_sessions(rows: &[Row], rules: &MetricRules) -> Result<Vec<RawSession>, EtlError> {
    let mut sessions = Vec::with_capacity(rows.len());

    for (idx, row) in rows.iter().enumerate() {
        let session_id = required_text(row, "session_id", "posthog session", idx)?;
        let distinct_id = text(row, &["distinct_id"]);
        if distinct_id.as_deref().is_some_and(|id| rules.is_excluded(id)) {
            continue;
        }

        sessions.push(RawSession {
            session_id,
            distinct_id,
            start_timestamp: timestamp(row, &["start_timestamp"]),
            end_timestamp: timestamp(row, &["end_timestamp"]),
            session_duration: number(row, &["session_duration"]),
            autocapture_count: count(row, &["autocapture_count"]),
            screen_count: count(row, &["screen_count"]),
            device_type: text(row, &["device_type", "$device_type"]),
            os: text(row, &["os", "$os"]),
        });
    }

    Ok(sessions)
}

pub fn parse_users(rows: &[Row]) -> Result<Vec<FirebaseUser>, EtlError> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            Ok(FirebaseUser {
                user_id: required_text(row, "user_id", "firebase user", idx)?,
                phone_number: text(row, &["phoneNumber", "phone_number"]),
                full_name: text(row, &["fullName", "full_name"]),
                username: text(row, &["username"]),
                email: text(row, &["email"]),
                contact_access_granted: flag(
                    row,
                    &["contactAccessGranted", "contact_access_granted"],
                ),
                business_user: flag(row, &["businessUser", "business_user"]),
                created_at: timestamp(row, &["createdAt", "created_at"]),
            })
        })
        .collect()
}

pub fn parse_firebase_events(rows: &[Row]) -> Result<Vec<FirebaseEvent>, EtlError> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            Ok(FirebaseEvent {
                user_id: required_text(row, "user_id", "firebase event", idx)?,
                created_at: timestamp(row, &["createdAt", "created_at"]),
            })
        })
        .collect()
}

fn parse_properties(value: Option<&Value>, idx: usize) -> Result<Properties, EtlError> {
    match value {
        None | Some(Value::Null) => Ok(Properties::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(Properties::new()),
        Some(Value::String(raw)) => serde_json::from_str::<Properties>(raw).map_err(|err| {
            EtlError::aggregation(format!(
                "posthog event row {idx} has malformed properties: {err}"
            ))
        }),
        Some(other) => Err(EtlError::aggregation(format!(
            "posthog event row {idx} has properties of unexpected type: {other}"
        ))),
    }
}

fn required_text(row: &Row, column: &str, what: &str, idx: usize) -> Result<String, EtlError> {
    text(row, &[column])
        .ok_or_else(|| EtlError::aggregation(format!("{what} row {idx} is missing {column}")))
}

/// Identifier-like properties may arrive as strings or numbers.
fn property_text(properties: &Properties, key: &str) -> Option<String> {
    value_text(properties.get(key)?)
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first<'a>(row: &'a Row, columns: &[&str]) -> Option<&'a Value> {
    columns
        .iter()
        .filter_map(|column| row.get(*column))
        .find(|value| !value.is_null())
}

fn text(row: &Row, columns: &[&str]) -> Option<String> {
    value_text(first(row, columns)?)
}

fn timestamp(row: &Row, columns: &[&str]) -> Option<DateTime<Utc>> {
    parse_source_timestamp(first(row, columns)?)
}

fn number(row: &Row, columns: &[&str]) -> Option<f64> {
    match first(row, columns)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn count(row: &Row, columns: &[&str]) -> Option<u64> {
    number(row, columns)
        .filter(|v| *v >= 0.0)
        .map(|v| v.round() as u64)
}

fn flag(row: &Row, columns: &[&str]) -> Option<bool> {
    match first(row, columns)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn properties_may_be_json_text_or_object() {
        let rules = MetricRules::default();
        let rows = vec![
            row(json!({
                "event": "view_event", "distinct_id": "d1", "timestamp": "2026-02-01T00:00:00Z",
                "properties": "{\"$session_id\": \"S1\", \"$lib\": \"posthog-react-native\"}"
            })),
            row(json!({
                "event": "join_event", "distinct_id": "d1", "timestamp": "2026-02-01T00:01:00Z",
                "properties": { "$session_id": "S1", "$lib": "posthog-react-native" }
            })),
        ];

        let events = parse_events(&rows, &rules).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.session_id == "S1"));
    }

    #[test]
    fn unattributable_and_foreign_events_are_dropped() {
        let rules = MetricRules {
            excluded_distinct_ids: vec!["internal".into()],
            ..MetricRules::default()
        };
        let base = |distinct: &str, props: Value| {
            row(json!({
                "event": "view_event", "distinct_id": distinct,
                "timestamp": "2026-02-01T00:00:00Z", "properties": props
            }))
        };
        let rows = vec![
            base("d1", json!({ "$lib": "posthog-react-native" })),
            base("d1", json!({ "$session_id": null, "$lib": "posthog-react-native" })),
            base("internal", json!({ "$session_id": "S1", "$lib": "posthog-react-native" })),
            base("d1", json!({ "$session_id": "S1", "$lib": "web" })),
            base("d1", json!({ "$session_id": "S2", "$lib": "posthog-react-native" })),
        ];

        let events = parse_events(&rows, &rules).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id, "S2");

        let any_lib = MetricRules {
            allowed_lib: None,
            ..rules
        };
        assert_eq!(parse_events(&rows, &any_lib).unwrap().len(), 2);
    }

    #[test]
    fn missing_identifiers_are_structural_errors() {
        let rules = MetricRules::default();
        let no_distinct = vec![row(json!({
            "event": "view_event", "timestamp": "2026-02-01T00:00:00Z", "properties": {}
        }))];
        assert!(matches!(
            parse_events(&no_distinct, &rules),
            Err(EtlError::AggregationError { ref reason }) if reason.contains("distinct_id")
        ));

        let no_session_id = vec![row(json!({ "distinct_id": "d1" }))];
        assert!(parse_sessions(&no_session_id, &rules).is_err());

        let no_user_id = vec![row(json!({ "phoneNumber": "+1555" }))];
        assert!(parse_users(&no_user_id).is_err());
        assert!(parse_firebase_events(&no_user_id).is_err());
    }

    #[test]
    fn malformed_optional_columns_are_absent() {
        let rules = MetricRules::default();
        let sessions = parse_sessions(
            &[row(json!({
                "session_id": "S1",
                "start_timestamp": "not a time",
                "session_duration": "12.5",
                "autocapture_count": -3,
                "screen_count": "4",
            }))],
            &rules,
        )
        .unwrap();

        assert_eq!(sessions[0].start_timestamp, None);
        assert_eq!(sessions[0].session_duration, Some(12.5));
        assert_eq!(sessions[0].autocapture_count, None);
        assert_eq!(sessions[0].screen_count, Some(4));

        let users = parse_users(&[row(json!({
            "user_id": "U1", "contactAccessGranted": 1, "businessUser": "false"
        }))])
        .unwrap();
        assert_eq!(users[0].contact_access_granted, Some(true));
        assert_eq!(users[0].business_user, Some(false));
    }
}
