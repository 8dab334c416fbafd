//! Destination handle: the only shared mutable resource of the pipeline.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::models::{AggregatedPerson, AggregatedSession, WatermarkField};

/// Write side of the pipeline. Every batch operation is all-or-nothing.
#[async_trait]
pub trait Destination: Send + Sync + 'static {
    /// Largest stored value of `field`, `None` when the table is empty.
    async fn read_watermark(&self, field: WatermarkField) -> Result<Option<DateTime<Utc>>>;

    /// Upserts `rows` keyed on `session_id`; matching rows are overwritten whole.
    async fn merge_rows(&self, rows: &[AggregatedSession]) -> Result<usize>;

    /// Atomically swaps the table contents for `rows`.
    async fn replace_all(&self, rows: &[AggregatedSession]) -> Result<usize>;

    /// Every stored session, ordered by `session_id`.
    async fn all_sessions(&self) -> Result<Vec<AggregatedSession>>;

    /// Atomically swaps the people rollup for `people`.
    async fn replace_people(&self, people: &[AggregatedPerson]) -> Result<usize>;
}

pub struct SqliteDestination {
    db: Database,
}

impl SqliteDestination {
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self {
            db: Database::new(path)?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Destination for SqliteDestination {
    async fn read_watermark(&self, field: WatermarkField) -> Result<Option<DateTime<Utc>>> {
        self.db.max_session_timestamp(field).await
    }

    async fn merge_rows(&self, rows: &[AggregatedSession]) -> Result<usize> {
        self.db.upsert_sessions(rows).await
    }

    async fn replace_all(&self, rows: &[AggregatedSession]) -> Result<usize> {
        self.db.replace_sessions(rows).await
    }

    async fn all_sessions(&self) -> Result<Vec<AggregatedSession>> {
        self.db.list_aggregated_sessions().await
    }

    async fn replace_people(&self, people: &[AggregatedPerson]) -> Result<usize> {
        self.db.replace_people(people).await
    }
}
