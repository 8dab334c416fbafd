use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::{AggregatedPerson, AggregatedSession};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Rolls aggregated sessions up to one row per Firebase user. Sessions with
/// no resolved user are skipped. Output is ordered by `user_id`.
pub fn rollup_people(
    sessions: &[AggregatedSession],
    loaded_at: DateTime<Utc>,
) -> Vec<AggregatedPerson> {
    let mut by_user: BTreeMap<&str, Vec<&AggregatedSession>> = BTreeMap::new();
    for session in sessions {
        if let Some(user_id) = session.user_id.as_deref() {
            by_user.entry(user_id).or_default().push(session);
        }
    }

    by_user
        .into_iter()
        .map(|(user_id, mut group)| {
            // Profile fields take the first non-null value in session start order.
            group.sort_by(|a, b| {
                match (a.start_timestamp, b.start_timestamp) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
                .then_with(|| a.session_id.cmp(&b.session_id))
            });
            summarize(user_id, &group, loaded_at)
        })
        .collect()
}

fn summarize(
    user_id: &str,
    sessions: &[&AggregatedSession],
    loaded_at: DateTime<Utc>,
) -> AggregatedPerson {
    let total = sessions.len() as u64;
    let sum_flag = |flag: fn(&AggregatedSession) -> bool| {
        sessions.iter().filter(|s| flag(s)).count() as u64
    };

    let durations: Vec<f64> = sessions.iter().filter_map(|s| s.session_duration).collect();
    let scrolls: Vec<u64> = sessions.iter().map(|s| s.scroll_event_count).collect();
    let autocaptures: Vec<u64> = sessions.iter().filter_map(|s| s.autocapture_count).collect();
    let screens: Vec<u64> = sessions.iter().filter_map(|s| s.screen_count).collect();

    let first_session_date = sessions.iter().filter_map(|s| s.start_timestamp).min();
    let last_session_date = sessions.iter().filter_map(|s| s.start_timestamp).max();
    let days_since_first_session = match (first_session_date, last_session_date) {
        (Some(first), Some(last)) => {
            Some((last - first).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY)
        }
        _ => None,
    };

    let mut person = AggregatedPerson {
        user_id: user_id.to_string(),
        total_sessions: total,

        avg_session_duration: mean(&durations),
        median_session_duration: median(&durations),
        total_session_duration: (!durations.is_empty()).then(|| durations.iter().sum()),
        min_session_duration: durations.iter().copied().reduce(f64::min),
        max_session_duration: durations.iter().copied().reduce(f64::max),
        std_session_duration: sample_std(&durations),

        created_event_sum: sum_flag(|s| s.created_event),
        viewed_event_sum: sum_flag(|s| s.viewed_event),
        joined_event_sum: sum_flag(|s| s.joined_event),
        invited_someone_sum: sum_flag(|s| s.invited_someone),
        enabled_contacts_sum: sum_flag(|s| s.enabled_contacts),
        scrolled_sum: sum_flag(|s| s.scrolled),
        visited_discover_sum: sum_flag(|s| s.visited_discover),
        started_quiz_sum: sum_flag(|s| s.started_quiz),
        completed_quiz_sum: sum_flag(|s| s.completed_quiz),

        total_scrolls: scrolls.iter().sum(),
        avg_scrolls_per_session: scrolls.iter().sum::<u64>() as f64 / total.max(1) as f64,
        max_scrolls_per_session: scrolls.iter().copied().max().unwrap_or(0),
        total_autocaptures: autocaptures.iter().sum(),
        avg_autocaptures_per_session: mean_counts(&autocaptures),
        max_autocaptures_per_session: autocaptures.iter().copied().max(),
        total_screens: screens.iter().sum(),
        avg_screens_per_session: mean_counts(&screens),
        max_screens_per_session: screens.iter().copied().max(),

        first_session_date,
        last_session_date,
        days_since_first_session,
        sessions_per_day: days_since_first_session.map(|days| total as f64 / (days + 1.0)),
        engagement_score: 0.0,

        loaded_at: Some(loaded_at),
        ..AggregatedPerson::default()
    };

    person.engagement_score = (person.created_event_sum
        + person.viewed_event_sum
        + person.joined_event_sum
        + person.scrolled_sum) as f64
        / total.max(1) as f64;

    for session in sessions {
        first_some(&mut person.full_name, &session.full_name);
        first_some(&mut person.phone_number, &session.phone_number);
        first_some(&mut person.username, &session.username);
        first_some(&mut person.email, &session.email);
        first_some(&mut person.contact_access_granted, &session.contact_access_granted);
        first_some(&mut person.business_user, &session.business_user);
        first_some(&mut person.user_created_at, &session.user_created_at);
        first_some(&mut person.city, &session.city);
        first_some(&mut person.country, &session.country);
    }

    person
}

fn first_some<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(value);
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn mean_counts(values: &[u64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<u64>() as f64 / values.len() as f64)
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Sample standard deviation (n - 1); undefined below two values.
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let variance =
        values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}
