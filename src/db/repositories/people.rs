use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{format_datetime, parse_datetime, parse_optional_datetime, to_i64, to_u64},
    Database,
};
use crate::models::AggregatedPerson;

const PEOPLE_COLUMNS: &str = "user_id, total_sessions, avg_session_duration,
    median_session_duration, total_session_duration, min_session_duration,
    max_session_duration, std_session_duration, created_event_sum, viewed_event_sum,
    joined_event_sum, invited_someone_sum, enabled_contacts_sum, scrolled_sum,
    visited_discover_sum, started_quiz_sum, completed_quiz_sum, total_scrolls,
    avg_scrolls_per_session, max_scrolls_per_session, total_autocaptures,
    avg_autocaptures_per_session, max_autocaptures_per_session, total_screens,
    avg_screens_per_session, max_screens_per_session, first_session_date, last_session_date,
    days_since_first_session, sessions_per_day, engagement_score, full_name, phone_number,
    username, email, contact_access_granted, business_user, user_created_at, city, country,
    _loaded_at";

fn count(row: &Row, field: &str) -> Result<u64> {
    to_u64(row.get(field)?, field)
}

fn row_to_person(row: &Row) -> Result<AggregatedPerson> {
    let loaded_at: String = row.get("_loaded_at")?;
    let max_autocaptures: Option<i64> = row.get("max_autocaptures_per_session")?;
    let max_screens: Option<i64> = row.get("max_screens_per_session")?;

    Ok(AggregatedPerson {
        user_id: row.get("user_id")?,
        total_sessions: count(row, "total_sessions")?,
        avg_session_duration: row.get("avg_session_duration")?,
        median_session_duration: row.get("median_session_duration")?,
        total_session_duration: row.get("total_session_duration")?,
        min_session_duration: row.get("min_session_duration")?,
        max_session_duration: row.get("max_session_duration")?,
        std_session_duration: row.get("std_session_duration")?,
        created_event_sum: count(row, "created_event_sum")?,
        viewed_event_sum: count(row, "viewed_event_sum")?,
        joined_event_sum: count(row, "joined_event_sum")?,
        invited_someone_sum: count(row, "invited_someone_sum")?,
        enabled_contacts_sum: count(row, "enabled_contacts_sum")?,
        scrolled_sum: count(row, "scrolled_sum")?,
        visited_discover_sum: count(row, "visited_discover_sum")?,
        started_quiz_sum: count(row, "started_quiz_sum")?,
        completed_quiz_sum: count(row, "completed_quiz_sum")?,
        total_scrolls: count(row, "total_scrolls")?,
        avg_scrolls_per_session: row.get("avg_scrolls_per_session")?,
        max_scrolls_per_session: count(row, "max_scrolls_per_session")?,
        total_autocaptures: count(row, "total_autocaptures")?,
        avg_autocaptures_per_session: row.get("avg_autocaptures_per_session")?,
        max_autocaptures_per_session: max_autocaptures
            .map(|v| to_u64(v, "max_autocaptures_per_session"))
            .transpose()?,
        total_screens: count(row, "total_screens")?,
        avg_screens_per_session: row.get("avg_screens_per_session")?,
        max_screens_per_session: max_screens
            .map(|v| to_u64(v, "max_screens_per_session"))
            .transpose()?,
        first_session_date: parse_optional_datetime(
            row.get("first_session_date")?,
            "first_session_date",
        )?,
        last_session_date: parse_optional_datetime(
            row.get("last_session_date")?,
            "last_session_date",
        )?,
        days_since_first_session: row.get("days_since_first_session")?,
        sessions_per_day: row.get("sessions_per_day")?,
        engagement_score: row.get("engagement_score")?,
        full_name: row.get("full_name")?,
        phone_number: row.get("phone_number")?,
        username: row.get("username")?,
        email: row.get("email")?,
        contact_access_granted: row.get("contact_access_granted")?,
        business_user: row.get("business_user")?,
        user_created_at: parse_optional_datetime(row.get("user_created_at")?, "user_created_at")?,
        city: row.get("city")?,
        country: row.get("country")?,
        loaded_at: Some(parse_datetime(&loaded_at, "_loaded_at")?),
    })
}

impl Database {
    /// Replaces `people_aggregated` with `people` in one transaction.
    pub async fn replace_people(&self, people: &[AggregatedPerson]) -> Result<usize> {
        let people = people.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute("DELETE FROM people_aggregated", [])
                .context("failed to clear people_aggregated")?;

            for person in &people {
                let loaded_at = person
                    .loaded_at
                    .as_ref()
                    .ok_or_else(|| anyhow!("person {} has no _loaded_at stamp", person.user_id))?;

                tx.execute(
                    &format!(
                        "INSERT INTO people_aggregated ({PEOPLE_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                                 ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                                 ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38,
                                 ?39, ?40, ?41)"
                    ),
                    params![
                        person.user_id,
                        to_i64(person.total_sessions)?,
                        person.avg_session_duration,
                        person.median_session_duration,
                        person.total_session_duration,
                        person.min_session_duration,
                        person.max_session_duration,
                        person.std_session_duration,
                        to_i64(person.created_event_sum)?,
                        to_i64(person.viewed_event_sum)?,
                        to_i64(person.joined_event_sum)?,
                        to_i64(person.invited_someone_sum)?,
                        to_i64(person.enabled_contacts_sum)?,
                        to_i64(person.scrolled_sum)?,
                        to_i64(person.visited_discover_sum)?,
                        to_i64(person.started_quiz_sum)?,
                        to_i64(person.completed_quiz_sum)?,
                        to_i64(person.total_scrolls)?,
                        person.avg_scrolls_per_session,
                        to_i64(person.max_scrolls_per_session)?,
                        to_i64(person.total_autocaptures)?,
                        person.avg_autocaptures_per_session,
                        person.max_autocaptures_per_session.map(to_i64).transpose()?,
                        to_i64(person.total_screens)?,
                        person.avg_screens_per_session,
                        person.max_screens_per_session.map(to_i64).transpose()?,
                        person.first_session_date.as_ref().map(format_datetime),
                        person.last_session_date.as_ref().map(format_datetime),
                        person.days_since_first_session,
                        person.sessions_per_day,
                        person.engagement_score,
                        person.full_name,
                        person.phone_number,
                        person.username,
                        person.email,
                        person.contact_access_granted,
                        person.business_user,
                        person.user_created_at.as_ref().map(format_datetime),
                        person.city,
                        person.country,
                        format_datetime(loaded_at),
                    ],
                )
                .with_context(|| format!("failed to write person {}", person.user_id))?;
            }

            tx.commit().context("failed to commit people replace")?;
            Ok(people.len())
        })
        .await
    }

    /// All people ordered by `user_id`.
    pub async fn list_people(&self) -> Result<Vec<AggregatedPerson>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PEOPLE_COLUMNS} FROM people_aggregated ORDER BY user_id ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut people = Vec::new();
            while let Some(row) = rows.next()? {
                people.push(row_to_person(row)?);
            }

            Ok(people)
        })
        .await
    }
}
