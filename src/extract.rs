//! Parallel extraction of the four source queries for one window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{EtlError, SourceError};
use crate::models::{ExtractedTables, ExtractionWindow, Row, SourceTable};
use crate::source::{SourceQuery, SourceReader};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// The two upstream sources. PostHog serves events and sessions, Firebase
/// serves users and app events.
#[derive(Clone)]
pub struct SourceHandles {
    pub posthog: Arc<dyn SourceReader>,
    pub firebase: Arc<dyn SourceReader>,
}

impl SourceHandles {
    pub fn new(posthog: Arc<dyn SourceReader>, firebase: Arc<dyn SourceReader>) -> Self {
        Self { posthog, firebase }
    }

    fn reader_for(&self, table: SourceTable) -> Arc<dyn SourceReader> {
        match table {
            SourceTable::PosthogEvents | SourceTable::PosthogSessions => self.posthog.clone(),
            SourceTable::FirebaseUsers | SourceTable::FirebaseEvents => self.firebase.clone(),
        }
    }
}

/// Runs the extraction queries concurrently, at most `max_concurrency` at a
/// time. Either every query succeeds or the whole extraction fails.
pub struct ExtractionCoordinator {
    sources: SourceHandles,
    queries: Vec<SourceQuery>,
    max_concurrency: usize,
    query_timeout: Option<Duration>,
}

impl ExtractionCoordinator {
    pub fn new(sources: SourceHandles, max_concurrency: usize) -> Self {
        Self {
            sources,
            queries: SourceTable::ALL
                .iter()
                .map(|table| SourceQuery::default_for(*table))
                .collect(),
            max_concurrency: max_concurrency.max(1),
            query_timeout: None,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub async fn extract_all(
        &self,
        window: &ExtractionWindow,
        limit: Option<u64>,
    ) -> Result<ExtractedTables, EtlError> {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();
        let mut task_tables = HashMap::new();

        for query in &self.queries {
            let reader = self.sources.reader_for(query.table);
            let semaphore = semaphore.clone();
            let query = query.clone();
            let window = *window;
            let timeout = self.query_timeout;
            let table = query.table;

            let handle = join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(err) => return Err(SourceError::Query(err.to_string())),
                };
                run_query(reader, &query, &window, limit, timeout).await
            });
            task_tables.insert(handle.id(), table);
        }

        let mut tables = ExtractedTables::default();
        while let Some(joined) = join_set.join_next_with_id().await {
            let failure = match joined {
                Ok((id, Ok(rows))) => {
                    if let Some(table) = task_tables.get(&id) {
                        log_info!("Extracted {} rows from {}", rows.len(), table);
                        tables.insert(*table, rows);
                    }
                    continue;
                }
                Ok((id, Err(err))) => (task_tables.get(&id).copied(), err.to_string()),
                Err(join_err) => (
                    task_tables.get(&join_err.id()).copied(),
                    format!("extraction task did not complete: {join_err}"),
                ),
            };

            join_set.abort_all();
            let (table, cause) = failure;
            let source_table = table.unwrap_or(SourceTable::PosthogEvents);
            log_error!("Extraction of {} failed: {}", source_table, cause);
            return Err(EtlError::ExtractionFailed {
                source_table,
                cause,
            });
        }

        log_info!(
            "Extraction finished in {:.2}s: {:?}",
            started.elapsed().as_secs_f64(),
            tables.row_counts()
        );
        Ok(tables)
    }
}

async fn run_query(
    reader: Arc<dyn SourceReader>,
    query: &SourceQuery,
    window: &ExtractionWindow,
    limit: Option<u64>,
    timeout: Option<Duration>,
) -> Result<Vec<Row>, SourceError> {
    let fut = reader.query(query, window, limit);
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut).await.map_err(|_| {
            SourceError::Timeout(format!(
                "{} query on {} exceeded {:?}",
                reader.name(),
                query.relation,
                timeout
            ))
        })?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StaticSource;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn window() -> ExtractionWindow {
        ExtractionWindow::new(
            Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap(),
        )
    }

    fn posthog() -> StaticSource {
        StaticSource::new("posthog")
            .with_rows(
                "events",
                vec![
                    json!({ "event": "view_event", "distinct_id": "d1" }),
                    json!({ "event": "join_event", "distinct_id": "d1" }),
                ],
            )
            .with_rows("sessions", vec![json!({ "session_id": "S1" })])
    }

    fn firebase() -> StaticSource {
        StaticSource::new("firebase")
            .with_rows("users", vec![json!({ "user_id": "U1" })])
            .with_rows("events", vec![])
    }

    #[tokio::test]
    async fn every_table_lands_in_its_slot() {
        let coordinator = ExtractionCoordinator::new(
            SourceHandles::new(Arc::new(posthog()), Arc::new(firebase())),
            3,
        );

        let tables = coordinator.extract_all(&window(), None).await.unwrap();
        assert_eq!(tables.posthog_events.len(), 2);
        assert_eq!(tables.posthog_sessions.len(), 1);
        assert_eq!(tables.firebase_users.len(), 1);
        // Empty is a success, not a failure.
        assert!(tables.firebase_events.is_empty());
    }

    #[tokio::test]
    async fn one_failure_fails_the_whole_extraction() {
        let posthog = Arc::new(posthog().delayed("events", Duration::from_millis(200)));
        let firebase = Arc::new(firebase().failing("users", "relation users does not exist"));
        let coordinator =
            ExtractionCoordinator::new(SourceHandles::new(posthog.clone(), firebase), 4);

        let err = coordinator.extract_all(&window(), None).await.unwrap_err();
        assert_eq!(
            err,
            EtlError::ExtractionFailed {
                source_table: SourceTable::FirebaseUsers,
                cause: "query error: relation users does not exist".into(),
            }
        );

        // The slow query was cancelled rather than awaited.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(posthog.completed.load(Ordering::SeqCst) < 2);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let posthog = Arc::new(
            posthog()
                .delayed("events", Duration::from_millis(50))
                .delayed("sessions", Duration::from_millis(50)),
        );
        let coordinator = ExtractionCoordinator::new(
            SourceHandles::new(posthog.clone(), Arc::new(firebase())),
            1,
        );

        coordinator.extract_all(&window(), None).await.unwrap();
        assert_eq!(posthog.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_queries_time_out() {
        let posthog = Arc::new(posthog().delayed("sessions", Duration::from_millis(500)));
        let coordinator =
            ExtractionCoordinator::new(SourceHandles::new(posthog, Arc::new(firebase())), 4)
                .with_query_timeout(Some(Duration::from_millis(20)));

        let err = coordinator.extract_all(&window(), None).await.unwrap_err();
        match err {
            EtlError::ExtractionFailed {
                source_table,
                cause,
            } => {
                assert_eq!(source_table, SourceTable::PosthogSessions);
                assert!(cause.contains("timed out"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn limit_reaches_every_query() {
        let coordinator = ExtractionCoordinator::new(
            SourceHandles::new(Arc::new(posthog()), Arc::new(firebase())),
            3,
        );

        let tables = coordinator.extract_all(&window(), Some(1)).await.unwrap();
        assert_eq!(tables.posthog_events.len(), 1);
    }
}
