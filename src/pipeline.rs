//! Orchestrates one run: Watermark -> Extraction -> Aggregation -> Load,
//! followed by the optional people rollup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::aggregation::{rollup_people, SessionAggregator};
use crate::config::EtlConfig;
use crate::destination::{Destination, SqliteDestination};
use crate::error::{chain_to_string, EtlError};
use crate::extract::{ExtractionCoordinator, SourceHandles};
use crate::loader::Loader;
use crate::models::{
    ExtractionWindow, PipelineResult, PipelineStage, RunOptions, RunStatus,
};
use crate::source::SqliteSource;
use crate::watermark::WatermarkManager;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

pub struct Pipeline {
    watermark: WatermarkManager,
    extraction: ExtractionCoordinator,
    aggregator: SessionAggregator,
    loader: Loader,
    destination: Arc<dyn Destination>,
    people_rollup: bool,
}

/// What a run has accomplished so far; survives into the failure report.
struct RunProgress {
    run_id: String,
    stage: PipelineStage,
    window: Option<ExtractionWindow>,
    rows_extracted: BTreeMap<String, usize>,
    rows_aggregated: usize,
    rows_loaded: usize,
    people_rows: Option<usize>,
}

impl RunProgress {
    fn enter(&mut self, stage: PipelineStage) {
        log_info!(
            "Run {}: {} -> {}",
            self.run_id,
            self.stage.as_str(),
            stage.as_str()
        );
        self.stage = stage;
    }
}

impl Pipeline {
    /// Wires the stages around already-opened handles.
    pub fn new(
        config: &EtlConfig,
        sources: SourceHandles,
        destination: Arc<dyn Destination>,
    ) -> Self {
        Self {
            watermark: WatermarkManager::new(
                destination.clone(),
                config.watermark_field,
                config.dataset_origin,
            ),
            extraction: ExtractionCoordinator::new(sources, config.max_concurrent_queries)
                .with_query_timeout(config.query_timeout()),
            aggregator: SessionAggregator::new(config.metrics.clone()),
            loader: Loader::new(destination.clone()),
            destination,
            people_rollup: config.people_rollup,
        }
    }

    /// Opens the SQLite sources and destination named in `config`.
    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        config.validate()?;
        let posthog = SqliteSource::open("posthog", config.posthog_db.clone())?;
        let firebase = SqliteSource::open("firebase", config.firebase_db.clone())?;
        let destination = SqliteDestination::open(config.destination_db.clone())?;

        Ok(Self::new(
            config,
            SourceHandles::new(Arc::new(posthog), Arc::new(firebase)),
            Arc::new(destination),
        ))
    }

    /// Executes one run. Never panics on stage failure: the returned result
    /// carries the failing stage and cause instead.
    pub async fn run(&self, options: RunOptions) -> PipelineResult {
        // Stored timestamps keep microseconds; truncate so the next watermark
        // equals this window's end exactly.
        let started_at = Utc::now().trunc_subsecs(6);
        let timer = Instant::now();
        let mut progress = RunProgress {
            run_id: Uuid::new_v4().to_string(),
            stage: PipelineStage::Idle,
            window: None,
            rows_extracted: BTreeMap::new(),
            rows_aggregated: 0,
            rows_loaded: 0,
            people_rows: None,
        };

        log_info!(
            "Run {} starting in {} mode (limit: {:?})",
            progress.run_id,
            options.mode.as_str(),
            options.limit
        );

        let outcome = self.execute(&options, started_at, &mut progress).await;
        let (status, failed_stage, error_detail) = match outcome {
            Ok(()) => {
                progress.enter(PipelineStage::Done);
                (RunStatus::Success, None, None)
            }
            Err(err) => {
                let stage = err.stage();
                log_error!("Run {} failed during {}: {}", progress.run_id, stage.as_str(), err);
                progress.enter(PipelineStage::Failed);
                (RunStatus::Failure, Some(stage), Some(err.to_string()))
            }
        };

        let result = PipelineResult {
            run_id: progress.run_id,
            mode: options.mode,
            started_at,
            window: progress.window,
            rows_extracted: progress.rows_extracted,
            rows_aggregated: progress.rows_aggregated,
            rows_loaded: progress.rows_loaded,
            people_rows: progress.people_rows,
            duration_seconds: timer.elapsed().as_secs_f64(),
            status,
            failed_stage,
            error_detail,
        };

        log_info!(
            "Run {} finished: {:?}, {} rows loaded in {:.2}s",
            result.run_id,
            result.status,
            result.rows_loaded,
            result.duration_seconds
        );
        result
    }

    async fn execute(
        &self,
        options: &RunOptions,
        started_at: DateTime<Utc>,
        progress: &mut RunProgress,
    ) -> Result<(), EtlError> {
        progress.enter(PipelineStage::ResolvingWindow);
        let window = self
            .watermark
            .resolve_window(options.mode, options.explicit_start, started_at)
            .await?;
        progress.window = Some(window);
        log_info!(
            "Extraction window [{}, {})",
            window.start_timestamp.to_rfc3339(),
            window.end_timestamp.to_rfc3339()
        );

        progress.enter(PipelineStage::Extracting);
        let tables = self.extraction.extract_all(&window, options.limit).await?;
        progress.rows_extracted = tables.row_counts();

        progress.enter(PipelineStage::Aggregating);
        let sessions = self.aggregator.aggregate(&tables)?;
        drop(tables);
        progress.rows_aggregated = sessions.len();

        progress.enter(PipelineStage::Loading);
        progress.rows_loaded = self.loader.load(sessions, options.mode, started_at).await?;

        if self.people_rollup && progress.rows_loaded > 0 {
            progress.enter(PipelineStage::Summarizing);
            progress.people_rows = Some(self.rebuild_people(started_at).await?);
        }

        Ok(())
    }

    /// Rebuilds the people rollup from the complete sessions table.
    async fn rebuild_people(&self, loaded_at: DateTime<Utc>) -> Result<usize, EtlError> {
        let summary_failed = |err: anyhow::Error| EtlError::SummaryFailed {
            cause: chain_to_string(&err),
        };

        let sessions = self.destination.all_sessions().await.map_err(summary_failed)?;
        let people = rollup_people(&sessions, loaded_at);
        let written = self
            .destination
            .replace_people(&people)
            .await
            .map_err(summary_failed)?;

        log_info!("Rebuilt people rollup: {} users from {} sessions", written, sessions.len());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceTable;
    use crate::test_support::{MemoryDestination, StaticSource};
    use serde_json::json;

    fn sources(posthog: StaticSource, firebase: StaticSource) -> SourceHandles {
        SourceHandles::new(Arc::new(posthog), Arc::new(firebase))
    }

    fn posthog_with_session() -> StaticSource {
        StaticSource::new("posthog").with_rows(
            "events",
            vec![json!({
                "event": "view_event", "distinct_id": "U1",
                "timestamp": "2026-02-01T10:00:00Z",
                "properties": { "$session_id": "S1", "$lib": "posthog-react-native" }
            })],
        )
    }

    fn firebase_with_user() -> StaticSource {
        StaticSource::new("firebase").with_rows("users", vec![json!({ "user_id": "U1" })])
    }

    #[tokio::test]
    async fn successful_run_reports_every_stage() {
        let destination = Arc::new(MemoryDestination::default());
        let pipeline = Pipeline::new(
            &EtlConfig::default(),
            sources(posthog_with_session(), firebase_with_user()),
            destination.clone(),
        );

        let result = pipeline.run(RunOptions::default()).await;
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.rows_extracted["posthog_events"], 1);
        assert_eq!(result.rows_extracted["firebase_users"], 1);
        assert_eq!(result.rows_aggregated, 1);
        assert_eq!(result.rows_loaded, 1);
        assert_eq!(result.people_rows, Some(1));
        assert_eq!(result.window.unwrap().end_timestamp, result.started_at);
        assert_eq!(destination.sessions()[0].loaded_at, Some(result.started_at));
        assert_eq!(destination.people()[0].user_id, "U1");
    }

    #[tokio::test]
    async fn extraction_failure_writes_nothing() {
        let destination = Arc::new(MemoryDestination::default());
        let pipeline = Pipeline::new(
            &EtlConfig::default(),
            sources(
                posthog_with_session(),
                firebase_with_user().failing("events", "quota exceeded"),
            ),
            destination.clone(),
        );

        let result = pipeline.run(RunOptions::default()).await;
        assert_eq!(result.status, RunStatus::Failure);
        assert_eq!(result.failed_stage, Some(PipelineStage::Extracting));
        let detail = result.error_detail.unwrap();
        assert!(detail.contains(SourceTable::FirebaseEvents.as_str()), "{detail}");
        assert!(detail.contains("quota exceeded"));
        assert_eq!(result.rows_loaded, 0);
        assert!(destination.sessions().is_empty());
    }

    #[tokio::test]
    async fn watermark_failure_stops_before_extraction() {
        let destination = Arc::new(MemoryDestination::default());
        destination.fail_watermark("permission denied");
        let posthog = Arc::new(posthog_with_session());
        let pipeline = Pipeline::new(
            &EtlConfig::default(),
            SourceHandles::new(posthog.clone(), Arc::new(firebase_with_user())),
            destination,
        );

        let result = pipeline.run(RunOptions::default()).await;
        assert_eq!(result.failed_stage, Some(PipelineStage::ResolvingWindow));
        assert!(result.window.is_none());
        assert_eq!(posthog.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn structurally_invalid_rows_fail_aggregation() {
        let destination = Arc::new(MemoryDestination::default());
        let broken = StaticSource::new("posthog")
            .with_rows("sessions", vec![json!({ "distinct_id": "U1" })]);
        let pipeline = Pipeline::new(
            &EtlConfig::default(),
            sources(broken, firebase_with_user()),
            destination.clone(),
        );

        let result = pipeline.run(RunOptions::default()).await;
        assert_eq!(result.failed_stage, Some(PipelineStage::Aggregating));
        assert_eq!(result.rows_extracted["posthog_sessions"], 1);
        assert!(destination.sessions().is_empty());
    }

    #[tokio::test]
    async fn rollup_failure_after_load_keeps_sessions() {
        let destination = Arc::new(MemoryDestination::default());
        destination.fail_people("table is locked");
        let pipeline = Pipeline::new(
            &EtlConfig::default(),
            sources(posthog_with_session(), firebase_with_user()),
            destination.clone(),
        );

        let result = pipeline.run(RunOptions::default()).await;
        assert_eq!(result.failed_stage, Some(PipelineStage::Summarizing));
        assert_eq!(result.rows_loaded, 1);
        assert_eq!(destination.sessions().len(), 1);
    }

    #[tokio::test]
    async fn rollup_can_be_disabled() {
        let destination = Arc::new(MemoryDestination::default());
        let config = EtlConfig {
            people_rollup: false,
            ..EtlConfig::default()
        };
        let pipeline = Pipeline::new(
            &config,
            sources(posthog_with_session(), firebase_with_user()),
            destination.clone(),
        );

        let result = pipeline.run(RunOptions::default()).await;
        assert!(result.is_success());
        assert_eq!(result.people_rows, None);
        assert!(destination.people().is_empty());
    }
}
