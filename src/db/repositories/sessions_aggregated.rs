use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row, Transaction};

use crate::db::{
    helpers::{format_datetime, parse_datetime, parse_optional_datetime, to_i64, to_u64},
    Database,
};
use crate::models::{AggregatedSession, WatermarkField};

const SESSION_COLUMNS: &str = "session_id, distinct_id, user_id, start_timestamp, end_timestamp,
    session_duration, first_event_at, last_event_at, city, country, device_type, os,
    event_count, event_type_counts, creation_count, created_event, viewed_event, joined_event,
    invited_someone, enabled_contacts, scrolled, visited_discover, scroll_event_count,
    scroll_depth, started_quiz, completed_quiz, autocapture_count, screen_count, full_name,
    phone_number, username, email, contact_access_granted, business_user, user_created_at,
    _loaded_at";

fn optional_u64(value: Option<i64>, field: &str) -> Result<Option<u64>> {
    value.map(|v| to_u64(v, field)).transpose()
}

fn row_to_session(row: &Row) -> Result<AggregatedSession> {
    let event_type_counts: String = row.get("event_type_counts")?;
    let loaded_at: String = row.get("_loaded_at")?;

    Ok(AggregatedSession {
        session_id: row.get("session_id")?,
        distinct_id: row.get("distinct_id")?,
        user_id: row.get("user_id")?,
        start_timestamp: parse_optional_datetime(row.get("start_timestamp")?, "start_timestamp")?,
        end_timestamp: parse_optional_datetime(row.get("end_timestamp")?, "end_timestamp")?,
        session_duration: row.get("session_duration")?,
        first_event_at: parse_optional_datetime(row.get("first_event_at")?, "first_event_at")?,
        last_event_at: parse_optional_datetime(row.get("last_event_at")?, "last_event_at")?,
        city: row.get("city")?,
        country: row.get("country")?,
        device_type: row.get("device_type")?,
        os: row.get("os")?,
        event_count: to_u64(row.get("event_count")?, "event_count")?,
        event_type_counts: serde_json::from_str::<BTreeMap<String, u64>>(&event_type_counts)
            .context("failed to parse event_type_counts")?,
        creation_count: to_u64(row.get("creation_count")?, "creation_count")?,
        created_event: row.get("created_event")?,
        viewed_event: row.get("viewed_event")?,
        joined_event: row.get("joined_event")?,
        invited_someone: row.get("invited_someone")?,
        enabled_contacts: row.get("enabled_contacts")?,
        scrolled: row.get("scrolled")?,
        visited_discover: row.get("visited_discover")?,
        scroll_event_count: to_u64(row.get("scroll_event_count")?, "scroll_event_count")?,
        scroll_depth: row.get("scroll_depth")?,
        started_quiz: row.get("started_quiz")?,
        completed_quiz: row.get("completed_quiz")?,
        autocapture_count: optional_u64(row.get("autocapture_count")?, "autocapture_count")?,
        screen_count: optional_u64(row.get("screen_count")?, "screen_count")?,
        full_name: row.get("full_name")?,
        phone_number: row.get("phone_number")?,
        username: row.get("username")?,
        email: row.get("email")?,
        contact_access_granted: row.get("contact_access_granted")?,
        business_user: row.get("business_user")?,
        user_created_at: parse_optional_datetime(row.get("user_created_at")?, "user_created_at")?,
        loaded_at: Some(parse_datetime(&loaded_at, "_loaded_at")?),
    })
}

/// Writes one row, replacing any existing row with the same `session_id` in full.
fn write_session(tx: &Transaction<'_>, session: &AggregatedSession) -> Result<()> {
    let loaded_at = session
        .loaded_at
        .as_ref()
        .ok_or_else(|| anyhow!("session {} has no _loaded_at stamp", session.session_id))?;
    let event_type_counts = serde_json::to_string(&session.event_type_counts)
        .context("failed to serialize event_type_counts")?;

    tx.execute(
        &format!(
            "INSERT OR REPLACE INTO sessions_aggregated ({SESSION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                     ?31, ?32, ?33, ?34, ?35, ?36)"
        ),
        params![
            session.session_id,
            session.distinct_id,
            session.user_id,
            session.start_timestamp.as_ref().map(format_datetime),
            session.end_timestamp.as_ref().map(format_datetime),
            session.session_duration,
            session.first_event_at.as_ref().map(format_datetime),
            session.last_event_at.as_ref().map(format_datetime),
            session.city,
            session.country,
            session.device_type,
            session.os,
            to_i64(session.event_count)?,
            event_type_counts,
            to_i64(session.creation_count)?,
            session.created_event,
            session.viewed_event,
            session.joined_event,
            session.invited_someone,
            session.enabled_contacts,
            session.scrolled,
            session.visited_discover,
            to_i64(session.scroll_event_count)?,
            session.scroll_depth,
            session.started_quiz,
            session.completed_quiz,
            session.autocapture_count.map(to_i64).transpose()?,
            session.screen_count.map(to_i64).transpose()?,
            session.full_name,
            session.phone_number,
            session.username,
            session.email,
            session.contact_access_granted,
            session.business_user,
            session.user_created_at.as_ref().map(format_datetime),
            format_datetime(loaded_at),
        ],
    )
    .with_context(|| format!("failed to write session {}", session.session_id))?;
    Ok(())
}

impl Database {
    /// Largest value of the watermark column, `None` for an empty table.
    pub async fn max_session_timestamp(
        &self,
        field: WatermarkField,
    ) -> Result<Option<DateTime<Utc>>> {
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    &format!("SELECT MAX({}) FROM sessions_aggregated", field.column()),
                    [],
                    |row| row.get(0),
                )
                .with_context(|| format!("failed to read MAX({})", field.column()))?;
            parse_optional_datetime(raw, field.column())
        })
        .await
    }

    /// Merge keyed on `session_id`, all rows in one transaction.
    pub async fn upsert_sessions(&self, sessions: &[AggregatedSession]) -> Result<usize> {
        let sessions = sessions.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            for session in &sessions {
                write_session(&tx, session)?;
            }

            tx.commit().context("failed to commit session merge")?;
            Ok(sessions.len())
        })
        .await
    }

    /// Swaps the whole table contents. Readers see either the old or the new rows.
    pub async fn replace_sessions(&self, sessions: &[AggregatedSession]) -> Result<usize> {
        let sessions = sessions.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute("DELETE FROM sessions_aggregated", [])
                .context("failed to clear sessions_aggregated")?;
            for session in &sessions {
                write_session(&tx, session)?;
            }

            tx.commit().context("failed to commit session replace")?;
            Ok(sessions.len())
        })
        .await
    }

    /// All sessions ordered by `session_id`.
    pub async fn list_aggregated_sessions(&self) -> Result<Vec<AggregatedSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions_aggregated ORDER BY session_id ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    pub async fn count_aggregated_sessions(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM sessions_aggregated", [], |row| {
                    row.get(0)
                })?;
            to_u64(count, "count")
        })
        .await
    }
}
