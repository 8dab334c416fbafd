use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::aggregation::config::{matches, MetricRules};
use crate::aggregation::rows::{parse_events, parse_firebase_events, parse_sessions, parse_users};
use crate::aggregation::users::UserDirectory;
use crate::error::EtlError;
use crate::models::{AggregatedSession, ExtractedTables, FirebaseUser, RawEvent, RawSession};

/// Main aggregation function: one output row per session seen in either the
/// event stream or the session table, ordered by `session_id`.
pub fn aggregate_sessions(
    tables: &ExtractedTables,
    rules: &MetricRules,
) -> Result<Vec<AggregatedSession>, EtlError> {
    let events = parse_events(&tables.posthog_events, rules)?;
    let sessions = parse_sessions(&tables.posthog_sessions, rules)?;
    let users = parse_users(&tables.firebase_users)?;
    let firebase_events = parse_firebase_events(&tables.firebase_events)?;
    let directory = UserDirectory::build(users, &firebase_events);

    // Step 1: Group events by session, each group in time order
    let grouped = group_events(events);

    // Step 2: One session-table row per session
    let session_rows = dedup_sessions(sessions);

    let session_ids: BTreeSet<&String> = grouped.keys().chain(session_rows.keys()).collect();
    let mut aggregated = Vec::with_capacity(session_ids.len());

    for session_id in session_ids {
        let mut row = AggregatedSession::new(session_id.clone());

        // Step 3: Event-derived metrics
        if let Some(events) = grouped.get(session_id) {
            apply_event_metrics(&mut row, events, rules);
        }

        // Step 4: Session-table fields
        if let Some(session) = session_rows.get(session_id) {
            apply_session_row(&mut row, session);
        }

        // Step 5: Firebase profile
        let user = row
            .distinct_id
            .as_deref()
            .and_then(|distinct_id| directory.resolve(distinct_id));
        if let Some(user) = user {
            apply_user(&mut row, user);
        }

        row.created_event = row.creation_count > 0 || created_in_app(&row, &directory);
        aggregated.push(row);
    }

    Ok(aggregated)
}

/// Groups events by session. Each group is sorted by timestamp, then by event
/// name, actor and serialized properties, so tied timestamps order the same
/// way whatever order the source returned them in.
fn group_events(events: Vec<RawEvent>) -> BTreeMap<String, Vec<RawEvent>> {
    let mut grouped: BTreeMap<String, Vec<RawEvent>> = BTreeMap::new();
    for event in events {
        grouped.entry(event.session_id.clone()).or_default().push(event);
    }
    for group in grouped.values_mut() {
        group.sort_by_cached_key(|event| {
            (
                event.timestamp,
                event.event_type.clone(),
                event.user_id.clone(),
                serde_json::to_string(&event.properties).unwrap_or_default(),
            )
        });
    }
    grouped
}

fn dedup_sessions(sessions: Vec<RawSession>) -> BTreeMap<String, RawSession> {
    let mut unique: BTreeMap<String, RawSession> = BTreeMap::new();
    for session in sessions {
        match unique.get(&session.session_id) {
            Some(current) if !supersedes(&session, current) => {}
            _ => {
                unique.insert(session.session_id.clone(), session);
            }
        }
    }
    unique
}

/// Earliest start wins, then latest end; a full tie goes to the row whose
/// serialized form sorts first.
fn supersedes(candidate: &RawSession, current: &RawSession) -> bool {
    let by_start = match (candidate.start_timestamp, current.start_timestamp) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    match by_start {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => match (candidate.end_timestamp, current.end_timestamp) {
            (Some(a), Some(b)) if a != b => a > b,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            _ => serialized(candidate) < serialized(current),
        },
    }
}

fn serialized(session: &RawSession) -> String {
    serde_json::to_string(session).unwrap_or_default()
}

/// Derives every event-based metric in a single pass over `events`.
fn apply_event_metrics(row: &mut AggregatedSession, events: &[RawEvent], rules: &MetricRules) {
    for event in events {
        let name = event.event_type.as_str();

        row.event_count += 1;
        *row.event_type_counts.entry(name.to_string()).or_insert(0) += 1;

        if row.distinct_id.is_none() {
            row.distinct_id = Some(event.user_id.clone());
        }
        fill(&mut row.city, event.property_str("$geoip_city_name"));
        fill(&mut row.country, event.property_str("$geoip_country_name"));
        fill(&mut row.device_type, event.property_str("$device_type"));
        fill(&mut row.os, event.property_str("$os"));

        if matches(&rules.creation_events, name) {
            row.creation_count += 1;
        }
        row.viewed_event |= matches(&rules.view_events, name);
        row.joined_event |= matches(&rules.join_events, name);
        row.invited_someone |= matches(&rules.invite_events, name);
        row.enabled_contacts |= MetricRules::is_enable_contacts(name);
        row.started_quiz |= matches(&rules.quiz_start_events, name);
        row.completed_quiz |= matches(&rules.quiz_completion_events, name);
        row.visited_discover |=
            event.property_str("$screen_name") == Some(rules.discover_screen.as_str());

        if event.property_f64(&rules.horizontal_coordinate_key).is_some() {
            row.scroll_event_count += 1;
        }
        if let Some(y) = event.property_f64(&rules.vertical_coordinate_key) {
            row.scroll_event_count += 1;
            row.scroll_depth = Some(row.scroll_depth.map_or(y, |depth| depth.max(y)));
        }

        if row.first_event_at.is_none() {
            row.first_event_at = Some(event.timestamp);
        }
        row.last_event_at = Some(event.timestamp);
    }

    row.scrolled = row.scroll_event_count > 0;
}

fn apply_session_row(row: &mut AggregatedSession, session: &RawSession) {
    if row.distinct_id.is_none() {
        row.distinct_id = session.distinct_id.clone();
    }
    row.start_timestamp = session.start_timestamp;
    row.end_timestamp = session.end_timestamp;
    row.session_duration = session.session_duration.or_else(|| {
        let (start, end) = (session.start_timestamp?, session.end_timestamp?);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    });
    row.autocapture_count = session.autocapture_count;
    row.screen_count = session.screen_count;
    if session.device_type.is_some() {
        row.device_type = session.device_type.clone();
    }
    if session.os.is_some() {
        row.os = session.os.clone();
    }
}

fn apply_user(row: &mut AggregatedSession, user: &FirebaseUser) {
    row.user_id = Some(user.user_id.clone());
    row.full_name = user.full_name.clone();
    row.phone_number = user.phone_number.clone();
    row.username = user.username.clone();
    row.email = user.email.clone();
    row.contact_access_granted = user.contact_access_granted;
    row.business_user = user.business_user;
    row.user_created_at = user.created_at;
}

fn created_in_app(row: &AggregatedSession, directory: &UserDirectory) -> bool {
    match (&row.user_id, row.start_timestamp, row.end_timestamp) {
        (Some(user_id), Some(start), Some(end)) => directory.created_between(user_id, start, end),
        _ => false,
    }
}

fn fill(slot: &mut Option<String>, value: Option<&str>) {
    if slot.is_none() {
        *slot = value.map(str::to_string);
    }
}
