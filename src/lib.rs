pub mod aggregation;
pub mod config;
pub mod db;
pub mod destination;
pub mod error;
pub mod extract;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod source;
pub mod watermark;
mod utils;

#[cfg(test)]
mod test_support;

pub use aggregation::{MetricRules, SessionAggregator};
pub use config::EtlConfig;
pub use destination::{Destination, SqliteDestination};
pub use error::{EtlError, SourceError};
pub use extract::{ExtractionCoordinator, SourceHandles};
pub use loader::Loader;
pub use models::{
    AggregatedPerson, AggregatedSession, ExtractionWindow, PipelineResult, PipelineStage,
    RunMode, RunOptions, RunStatus, WatermarkField,
};
pub use pipeline::Pipeline;
pub use source::{SourceQuery, SourceReader, SqliteSource};
pub use watermark::WatermarkManager;
