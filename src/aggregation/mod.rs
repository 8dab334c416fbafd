pub mod algorithm;
pub mod config;
pub mod people;
pub mod rows;
pub mod users;

pub use algorithm::aggregate_sessions;
pub use config::MetricRules;
pub use people::rollup_people;

use crate::error::EtlError;
use crate::models::{AggregatedSession, ExtractedTables};

const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Pure, synchronous transform from extracted tables to session rows.
#[derive(Debug, Clone, Default)]
pub struct SessionAggregator {
    rules: MetricRules,
}

impl SessionAggregator {
    pub fn new(rules: MetricRules) -> Self {
        Self { rules }
    }

    pub fn aggregate(&self, tables: &ExtractedTables) -> Result<Vec<AggregatedSession>, EtlError> {
        let sessions = aggregate_sessions(tables, &self.rules)?;
        log_info!(
            "Aggregated {} sessions from {} events and {} session rows",
            sessions.len(),
            tables.posthog_events.len(),
            tables.posthog_sessions.len()
        );
        Ok(sessions)
    }
}
