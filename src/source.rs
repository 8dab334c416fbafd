//! Source handles: the two upstream analytical stores the pipeline reads from.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::helpers::MalformedRow;
use crate::db::repositories::source_tables::TimeColumns;
use crate::db::Database;
use crate::error::{chain_to_string, SourceError};
use crate::models::{ExtractionWindow, Row, SourceTable};

/// One extraction query: which source relation to read and how to window it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceQuery {
    pub table: SourceTable,
    /// Relation name inside the source.
    pub relation: String,
    /// Column compared against the window; `None` reads the relation in full.
    pub time_column: Option<String>,
    /// End of an interval starting at `time_column`. When set, a row is read
    /// if its interval overlaps the window.
    pub end_column: Option<String>,
}

impl SourceQuery {
    pub fn new(table: SourceTable, relation: &str, time_column: Option<&str>) -> Self {
        Self {
            table,
            relation: relation.to_string(),
            time_column: time_column.map(str::to_string),
            end_column: None,
        }
    }

    pub fn with_end_column(mut self, column: &str) -> Self {
        self.end_column = Some(column.to_string());
        self
    }

    /// Default query for each table of the PostHog and Firebase exports.
    pub fn default_for(table: SourceTable) -> Self {
        match table {
            SourceTable::PosthogEvents => Self::new(table, "events", Some("timestamp")),
            // A session that started before the window but is still receiving
            // events must come along with them.
            SourceTable::PosthogSessions => {
                Self::new(table, "sessions", Some("start_timestamp"))
                    .with_end_column("end_timestamp")
            }
            // Dimension table: every session may join any user, however old.
            SourceTable::FirebaseUsers => Self::new(table, "users", None),
            SourceTable::FirebaseEvents => Self::new(table, "events", Some("createdAt")),
        }
    }

    fn time_columns(&self) -> Option<TimeColumns> {
        let start = self.time_column.as_deref()?;
        Some(match self.end_column.as_deref() {
            Some(end) => TimeColumns::interval(start, end),
            None => TimeColumns::instant(start),
        })
    }
}

/// Read side of an analytical source.
///
/// An empty result is `Ok(vec![])`; failures of any kind are `Err`.
#[async_trait]
pub trait SourceReader: Send + Sync + 'static {
    /// Short name used in logs and error reports.
    fn name(&self) -> &str;

    async fn query(
        &self,
        query: &SourceQuery,
        window: &ExtractionWindow,
        limit: Option<u64>,
    ) -> Result<Vec<Row>, SourceError>;
}

/// A source backed by a SQLite export of the upstream dataset.
pub struct SqliteSource {
    name: String,
    db: Database,
}

impl SqliteSource {
    pub fn open(name: &str, path: PathBuf) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            db: Database::open_source(path)?,
        })
    }
}

#[async_trait]
impl SourceReader for SqliteSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(
        &self,
        query: &SourceQuery,
        window: &ExtractionWindow,
        limit: Option<u64>,
    ) -> Result<Vec<Row>, SourceError> {
        self.db
            .select_source_rows(&query.relation, query.time_columns(), window, limit)
            .await
            .map_err(|err| match err.downcast_ref::<MalformedRow>() {
                Some(malformed) => SourceError::Malformed(format!(
                    "{} {}: {malformed}",
                    self.name, query.relation
                )),
                None => SourceError::Query(chain_to_string(&err)),
            })
    }
}
