use thiserror::Error;

use crate::models::{PipelineStage, SourceTable};

/// Stage failures of a pipeline run. Each one aborts the run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EtlError {
    #[error("watermark unavailable: {cause}")]
    WatermarkUnavailable { cause: String },

    #[error("extraction failed for {source_table}: {cause}")]
    ExtractionFailed {
        source_table: SourceTable,
        cause: String,
    },

    #[error("aggregation error: {reason}")]
    AggregationError { reason: String },

    #[error("load failed: {cause}")]
    LoadFailed { cause: String },

    #[error("people rollup failed after load: {cause}")]
    SummaryFailed { cause: String },
}

impl EtlError {
    pub fn aggregation(reason: impl Into<String>) -> Self {
        EtlError::AggregationError {
            reason: reason.into(),
        }
    }

    /// Stage in which this error is raised.
    pub fn stage(&self) -> PipelineStage {
        match self {
            EtlError::WatermarkUnavailable { .. } => PipelineStage::ResolvingWindow,
            EtlError::ExtractionFailed { .. } => PipelineStage::Extracting,
            EtlError::AggregationError { .. } => PipelineStage::Aggregating,
            EtlError::LoadFailed { .. } => PipelineStage::Loading,
            EtlError::SummaryFailed { .. } => PipelineStage::Summarizing,
        }
    }
}

/// Failure of a single source query. Distinct from an empty result, which is `Ok(vec![])`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("query error: {0}")]
    Query(String),

    #[error("query timed out: {0}")]
    Timeout(String),

    #[error("malformed result: {0}")]
    Malformed(String),
}

/// Renders an `anyhow` chain on one line, outermost context first.
pub(crate) fn chain_to_string(err: &anyhow::Error) -> String {
    format!("{err:#}")
}
