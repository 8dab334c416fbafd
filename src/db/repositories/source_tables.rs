use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, types::Value as SqlValue};

use crate::db::{
    helpers::{parse_source_timestamp, quote_identifier, sql_value_to_json, to_i64, MalformedRow},
    Database,
};
use crate::models::{ExtractionWindow, Row};

/// Columns a windowed read compares against the extraction window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeColumns {
    /// Event time, or interval start when `end` is set.
    pub start: String,
    /// Interval end. Interval rows are kept when `[start, end]` overlaps the
    /// window; a NULL end is read as equal to `start`.
    pub end: Option<String>,
}

impl TimeColumns {
    pub fn instant(column: &str) -> Self {
        Self {
            start: column.to_string(),
            end: None,
        }
    }

    pub fn interval(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: Some(end.to_string()),
        }
    }
}

impl Database {
    /// Reads raw rows from a source table, in storage order.
    ///
    /// With `time_columns` only rows inside the window are returned. Timestamps
    /// are compared as instants after parsing in every format the exports use;
    /// a NULL time is outside every window and an unparseable one fails the
    /// read with [`MalformedRow`]. `limit` counts rows after windowing.
    pub async fn select_source_rows(
        &self,
        table: &str,
        time_columns: Option<TimeColumns>,
        window: &ExtractionWindow,
        limit: Option<u64>,
    ) -> Result<Vec<Row>> {
        let mut sql = format!("SELECT * FROM {} ORDER BY rowid ASC", quote_identifier(table)?);
        let mut bindings: Vec<SqlValue> = Vec::new();
        if let (None, Some(limit)) = (&time_columns, limit) {
            sql.push_str(" LIMIT ?");
            bindings.push(SqlValue::Integer(to_i64(limit)?));
        }

        let table = table.to_string();
        let window = *window;
        self.execute(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .with_context(|| format!("failed to prepare query on {table}"))?;
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(|name| name.to_string())
                .collect();
            let filter = time_columns
                .map(|time| WindowFilter::resolve(&table, &columns, time))
                .transpose()?;

            let mut rows = stmt.query(params_from_iter(bindings.iter()))?;
            let mut out = Vec::new();
            let mut position = 0usize;
            while let Some(row) = rows.next()? {
                if limit.is_some_and(|limit| out.len() as u64 >= limit) {
                    break;
                }
                position += 1;

                let mut record = Row::new();
                for (idx, column) in columns.iter().enumerate() {
                    let value = sql_value_to_json(row.get_ref(idx)?, column)
                        .with_context(|| format!("row {position} of {table}"))?;
                    record.insert(column.clone(), value);
                }

                if let Some(filter) = &filter {
                    if !filter.keeps(&record, &window, position, &table)? {
                        continue;
                    }
                }
                out.push(record);
            }

            Ok(out)
        })
        .await
    }
}

struct WindowFilter {
    start: String,
    end: Option<String>,
}

impl WindowFilter {
    fn resolve(table: &str, columns: &[String], time: TimeColumns) -> Result<Self> {
        for column in std::iter::once(&time.start).chain(time.end.as_ref()) {
            quote_identifier(column)?;
            if !columns.iter().any(|c| c == column) {
                return Err(anyhow!("no such column: {table}.{column}"));
            }
        }
        Ok(Self {
            start: time.start,
            end: time.end,
        })
    }

    fn keeps(
        &self,
        record: &Row,
        window: &ExtractionWindow,
        position: usize,
        table: &str,
    ) -> Result<bool> {
        if window.is_empty() {
            return Ok(false);
        }
        let start = cell_timestamp(record, &self.start, position, table)?;
        let Some(end_column) = &self.end else {
            return Ok(start.is_some_and(|ts| window.contains(ts)));
        };

        let end = cell_timestamp(record, end_column, position, table)?;
        Ok(match (start.or(end), end.or(start)) {
            (Some(start), Some(end)) => {
                start < window.end_timestamp && end >= window.start_timestamp
            }
            _ => false,
        })
    }
}

fn cell_timestamp(
    record: &Row,
    column: &str,
    position: usize,
    table: &str,
) -> Result<Option<DateTime<Utc>>> {
    match record.get(column) {
        None => Ok(None),
        Some(value) if value.is_null() => Ok(None),
        Some(value) => match parse_source_timestamp(value) {
            Some(ts) => Ok(Some(ts)),
            None => Err(MalformedRow(format!(
                "row {position} of {table}: {column} holds unparseable timestamp {value}"
            ))
            .into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn seed(path: &std::path::Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE events (event TEXT, distinct_id TEXT, timestamp, properties TEXT);
             INSERT INTO events VALUES ('before', 'u', '2026-01-31T23:59:59Z', '{}');
             INSERT INTO events VALUES ('at_start', 'u', '2026-02-01T00:00:00Z', '{}');
             INSERT INTO events VALUES ('inside', 'u', '2026-02-01 06:30:00.250', '{}');
             INSERT INTO events VALUES ('offset', 'u', '2026-02-01T08:00:00+02:00', '{}');
             INSERT INTO events VALUES ('at_end', 'u', '2026-02-02T00:00:00.000000Z', '{}');
             INSERT INTO events VALUES ('no_time', 'u', NULL, '{}');",
        )
        .unwrap();
    }

    fn window() -> ExtractionWindow {
        ExtractionWindow::new(
            Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap(),
        )
    }

    fn names(rows: &[Row]) -> Vec<&str> {
        rows.iter().map(|r| r["event"].as_str().unwrap()).collect()
    }

    fn open(dir: &TempDir) -> Database {
        let path = dir.path().join("posthog.sqlite3");
        seed(&path);
        Database::open_source(path).unwrap()
    }

    #[tokio::test]
    async fn window_includes_start_and_excludes_end() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        let rows = db
            .select_source_rows("events", Some(TimeColumns::instant("timestamp")), &window(), None)
            .await
            .unwrap();
        assert_eq!(names(&rows), vec!["at_start", "inside", "offset"]);
        assert_eq!(rows[0]["distinct_id"], "u");
    }

    #[tokio::test]
    async fn export_timestamp_formats_are_windowed_alike() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("posthog.sqlite3");
        seed(&path);
        let inside = Utc.with_ymd_and_hms(2026, 2, 1, 6, 30, 0).unwrap().timestamp();
        Connection::open(&path)
            .unwrap()
            .execute_batch(&format!(
                "INSERT INTO events VALUES ('short_offset', 'u', '2026-02-01 06:30:00.000+00', '{{}}');
                 INSERT INTO events VALUES ('epoch', 'u', {inside}, '{{}}');
                 INSERT INTO events VALUES ('epoch_text', 'u', '{inside}', '{{}}');
                 INSERT INTO events VALUES ('epoch_outside', 'u', {}, '{{}}');",
                inside + 86_400,
            ))
            .unwrap();
        let db = Database::open_source(path).unwrap();

        let rows = db
            .select_source_rows("events", Some(TimeColumns::instant("timestamp")), &window(), None)
            .await
            .unwrap();
        assert_eq!(
            names(&rows),
            vec!["at_start", "inside", "offset", "short_offset", "epoch", "epoch_text"]
        );
    }

    #[tokio::test]
    async fn limit_counts_rows_inside_the_window() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        let rows = db
            .select_source_rows(
                "events",
                Some(TimeColumns::instant("timestamp")),
                &window(),
                Some(2),
            )
            .await
            .unwrap();
        assert_eq!(names(&rows), vec!["at_start", "inside"]);
    }

    #[tokio::test]
    async fn unparseable_time_is_a_malformed_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("posthog.sqlite3");
        seed(&path);
        Connection::open(&path)
            .unwrap()
            .execute_batch("INSERT INTO events VALUES ('garbled', 'u', 'last tuesday', '{}');")
            .unwrap();
        let db = Database::open_source(path).unwrap();

        let err = db
            .select_source_rows("events", Some(TimeColumns::instant("timestamp")), &window(), None)
            .await
            .unwrap_err();
        let malformed = err.downcast_ref::<MalformedRow>().unwrap();
        assert!(malformed.0.contains("last tuesday"), "{malformed}");
    }

    #[tokio::test]
    async fn intervals_are_kept_when_they_overlap_the_window() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("posthog.sqlite3");
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TABLE sessions (session_id TEXT, start_timestamp TEXT, end_timestamp TEXT);
                 INSERT INTO sessions VALUES ('ended_before', '2026-01-31T22:00:00Z', '2026-01-31T23:00:00Z');
                 INSERT INTO sessions VALUES ('straddles_start', '2026-01-31T23:50:00Z', '2026-02-01T00:10:00Z');
                 INSERT INTO sessions VALUES ('inside', '2026-02-01T09:00:00Z', '2026-02-01T09:30:00Z');
                 INSERT INTO sessions VALUES ('open', '2026-02-01T10:00:00Z', NULL);
                 INSERT INTO sessions VALUES ('starts_at_end', '2026-02-02T00:00:00Z', '2026-02-02T00:05:00Z');",
            )
            .unwrap();
        let db = Database::open_source(path).unwrap();

        let rows = db
            .select_source_rows(
                "sessions",
                Some(TimeColumns::interval("start_timestamp", "end_timestamp")),
                &window(),
                None,
            )
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r["session_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["straddles_start", "inside", "open"]);
    }

    #[tokio::test]
    async fn unwindowed_tables_are_read_in_full_with_limit() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        let all = db
            .select_source_rows("events", None, &window(), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 6);

        let capped = db
            .select_source_rows("events", None, &window(), Some(2))
            .await
            .unwrap();
        assert_eq!(names(&capped), vec!["before", "at_start"]);
    }

    #[tokio::test]
    async fn missing_table_or_column_is_an_error_not_an_empty_result() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        let missing_table = db
            .select_source_rows(
                "sessions",
                Some(TimeColumns::instant("start_timestamp")),
                &window(),
                None,
            )
            .await;
        assert!(missing_table.is_err());

        let missing_column = db
            .select_source_rows("events", Some(TimeColumns::instant("createdAt")), &window(), None)
            .await
            .unwrap_err();
        assert!(missing_column.downcast_ref::<MalformedRow>().is_none());
        assert!(missing_column.to_string().contains("createdAt"));
    }
}
