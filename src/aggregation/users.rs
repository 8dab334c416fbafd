use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{FirebaseEvent, FirebaseUser};

/// Firebase users indexed for resolving PostHog `distinct_id`s, plus the
/// creation times of each user's app events.
#[derive(Debug, Default)]
pub struct UserDirectory {
    by_phone: HashMap<String, FirebaseUser>,
    by_id: HashMap<String, FirebaseUser>,
    created_events: HashMap<String, Vec<DateTime<Utc>>>,
}

impl UserDirectory {
    pub fn build(users: Vec<FirebaseUser>, events: &[FirebaseEvent]) -> Self {
        let mut directory = Self::default();

        for user in users {
            if let Some(phone) = user.phone_number.clone() {
                keep_preferred(&mut directory.by_phone, phone, user.clone());
            }
            keep_preferred(&mut directory.by_id, user.user_id.clone(), user);
        }

        for event in events {
            if let Some(created_at) = event.created_at {
                directory
                    .created_events
                    .entry(event.user_id.clone())
                    .or_default()
                    .push(created_at);
            }
        }

        directory
    }

    /// Matches a PostHog `distinct_id` by phone number first, then by user id.
    pub fn resolve(&self, distinct_id: &str) -> Option<&FirebaseUser> {
        self.by_phone
            .get(distinct_id)
            .or_else(|| self.by_id.get(distinct_id))
    }

    /// Whether `user_id` created an app event within `[start, end]`.
    pub fn created_between(&self, user_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.created_events
            .get(user_id)
            .is_some_and(|times| times.iter().any(|t| start <= *t && *t <= end))
    }
}

/// Most complete record wins; ties go to the smallest `user_id` so the result
/// does not depend on input order.
fn keep_preferred(index: &mut HashMap<String, FirebaseUser>, key: String, candidate: FirebaseUser) {
    match index.get(&key) {
        Some(current) if !is_preferred(&candidate, current) => {}
        _ => {
            index.insert(key, candidate);
        }
    }
}

fn is_preferred(candidate: &FirebaseUser, current: &FirebaseUser) -> bool {
    candidate
        .completeness()
        .cmp(&current.completeness())
        .then_with(|| current.user_id.cmp(&candidate.user_id))
        .is_gt()
}
