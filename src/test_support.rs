//! In-memory fakes for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::destination::Destination;
use crate::error::SourceError;
use crate::models::{AggregatedPerson, AggregatedSession, ExtractionWindow, Row, WatermarkField};
use crate::source::{SourceQuery, SourceReader};

#[derive(Default)]
pub struct MemoryDestination {
    sessions: Mutex<BTreeMap<String, AggregatedSession>>,
    people: Mutex<Vec<AggregatedPerson>>,
    watermark_error: Mutex<Option<String>>,
    write_error: Mutex<Option<String>>,
    people_error: Mutex<Option<String>>,
    pub writes: AtomicUsize,
}

impl MemoryDestination {
    pub fn with_loaded_sessions(rows: &[(&str, DateTime<Utc>)]) -> Self {
        let destination = Self::default();
        {
            let mut sessions = destination.sessions.lock().unwrap();
            for (id, ts) in rows {
                let mut session = AggregatedSession::new(*id);
                session.start_timestamp = Some(*ts);
                session.loaded_at = Some(*ts);
                sessions.insert(id.to_string(), session);
            }
        }
        destination
    }

    pub fn fail_watermark(&self, cause: &str) {
        *self.watermark_error.lock().unwrap() = Some(cause.to_string());
    }

    pub fn fail_writes(&self, cause: &str) {
        *self.write_error.lock().unwrap() = Some(cause.to_string());
    }

    pub fn fail_people(&self, cause: &str) {
        *self.people_error.lock().unwrap() = Some(cause.to_string());
    }

    pub fn sessions(&self) -> Vec<AggregatedSession> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    pub fn people(&self) -> Vec<AggregatedPerson> {
        self.people.lock().unwrap().clone()
    }

    fn check_write(&self) -> Result<()> {
        if let Some(cause) = self.write_error.lock().unwrap().clone() {
            bail!(cause);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn read_watermark(&self, field: WatermarkField) -> Result<Option<DateTime<Utc>>> {
        if let Some(cause) = self.watermark_error.lock().unwrap().clone() {
            bail!(cause);
        }
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .values()
            .filter_map(|s| match field {
                WatermarkField::LoadedAt => s.loaded_at,
                WatermarkField::StartTimestamp => s.start_timestamp,
            })
            .max())
    }

    async fn merge_rows(&self, rows: &[AggregatedSession]) -> Result<usize> {
        self.check_write()?;
        let mut sessions = self.sessions.lock().unwrap();
        for row in rows {
            sessions.insert(row.session_id.clone(), row.clone());
        }
        Ok(rows.len())
    }

    async fn replace_all(&self, rows: &[AggregatedSession]) -> Result<usize> {
        self.check_write()?;
        let mut sessions = self.sessions.lock().unwrap();
        sessions.clear();
        for row in rows {
            sessions.insert(row.session_id.clone(), row.clone());
        }
        Ok(rows.len())
    }

    async fn all_sessions(&self) -> Result<Vec<AggregatedSession>> {
        Ok(self.sessions())
    }

    async fn replace_people(&self, people: &[AggregatedPerson]) -> Result<usize> {
        if let Some(cause) = self.people_error.lock().unwrap().clone() {
            bail!(cause);
        }
        *self.people.lock().unwrap() = people.to_vec();
        Ok(people.len())
    }
}

/// Source serving canned rows per relation.
#[derive(Default)]
pub struct StaticSource {
    name: String,
    relations: HashMap<String, Vec<Row>>,
    failing: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    pub calls: AtomicUsize,
    pub completed: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl StaticSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_rows(mut self, relation: &str, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|row| row.as_object().cloned())
            .collect();
        self.relations.insert(relation.to_string(), rows);
        self
    }

    pub fn failing(mut self, relation: &str, cause: &str) -> Self {
        self.failing.insert(relation.to_string(), cause.to_string());
        self
    }

    pub fn delayed(mut self, relation: &str, delay: Duration) -> Self {
        self.delays.insert(relation.to_string(), delay);
        self
    }
}

#[async_trait]
impl SourceReader for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(
        &self,
        query: &SourceQuery,
        _window: &ExtractionWindow,
        limit: Option<u64>,
    ) -> Result<Vec<Row>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&query.relation) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(cause) = self.failing.get(&query.relation) {
            return Err(SourceError::Query(cause.clone()));
        }

        let mut rows = self.relations.get(&query.relation).cloned().unwrap_or_default();
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(rows)
    }
}
