//! Run-level types: modes, windows, and the report handed back to callers.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Incremental,
    Full,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Incremental
    }
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Incremental => "incremental",
            RunMode::Full => "full",
        }
    }
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "incremental" => Ok(RunMode::Incremental),
            "full" => Ok(RunMode::Full),
            other => Err(anyhow!("unknown run mode '{other}'")),
        }
    }
}

/// Options supplied by whoever triggers a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunOptions {
    #[serde(default)]
    pub mode: RunMode,
    /// Row cap applied to every source query (test/debug runs).
    #[serde(default)]
    pub limit: Option<u64>,
    /// Overrides the resolved window start (backfills).
    #[serde(default)]
    pub explicit_start: Option<DateTime<Utc>>,
}

impl RunOptions {
    pub fn new(mode: RunMode, limit: Option<u64>) -> Result<Self> {
        if limit == Some(0) {
            bail!("limit must be a positive integer");
        }
        Ok(Self {
            mode,
            limit,
            explicit_start: None,
        })
    }
}

/// Destination column used as the incremental watermark.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkField {
    LoadedAt,
    StartTimestamp,
}

impl Default for WatermarkField {
    fn default() -> Self {
        WatermarkField::LoadedAt
    }
}

impl WatermarkField {
    pub fn column(&self) -> &'static str {
        match self {
            WatermarkField::LoadedAt => "_loaded_at",
            WatermarkField::StartTimestamp => "start_timestamp",
        }
    }
}

impl FromStr for WatermarkField {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "loaded_at" | "_loaded_at" => Ok(WatermarkField::LoadedAt),
            "start_timestamp" => Ok(WatermarkField::StartTimestamp),
            other => Err(anyhow!("unknown watermark field '{other}'")),
        }
    }
}

/// Time range of one extraction. Rows are selected with `start <= ts < end`,
/// so consecutive windows tile without gaps.
///
/// The start is inclusive, not exclusive: a row stamped exactly at the
/// previous watermark is read again, and the merge on `session_id` absorbs it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionWindow {
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
}

impl ExtractionWindow {
    pub fn new(start_timestamp: DateTime<Utc>, end_timestamp: DateTime<Utc>) -> Self {
        Self {
            start_timestamp,
            end_timestamp,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start_timestamp <= ts && ts < self.end_timestamp
    }

    pub fn is_empty(&self) -> bool {
        self.start_timestamp >= self.end_timestamp
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    ResolvingWindow,
    Extracting,
    Aggregating,
    Loading,
    Summarizing,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::ResolvingWindow => "resolving_window",
            PipelineStage::Extracting => "extracting",
            PipelineStage::Aggregating => "aggregating",
            PipelineStage::Loading => "loading",
            PipelineStage::Summarizing => "summarizing",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

/// Summary of one pipeline run, returned on success and on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineResult {
    pub run_id: String,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub window: Option<ExtractionWindow>,
    /// Row counts per source query.
    pub rows_extracted: BTreeMap<String, usize>,
    pub rows_aggregated: usize,
    pub rows_loaded: usize,
    pub people_rows: Option<usize>,
    pub duration_seconds: f64,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<PipelineStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
