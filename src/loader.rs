use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::destination::Destination;
use crate::error::{chain_to_string, EtlError};
use crate::models::{AggregatedSession, RunMode};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Writes aggregated sessions to the destination: merge-on-key for
/// incremental runs, atomic replace for full runs.
pub struct Loader {
    destination: Arc<dyn Destination>,
}

impl Loader {
    pub fn new(destination: Arc<dyn Destination>) -> Self {
        Self { destination }
    }

    /// Stamps every row with `loaded_at` and writes the batch. An empty batch
    /// is never written, so an empty full run leaves the table untouched.
    pub async fn load(
        &self,
        mut rows: Vec<AggregatedSession>,
        mode: RunMode,
        loaded_at: DateTime<Utc>,
    ) -> Result<usize, EtlError> {
        if rows.is_empty() {
            log_warn!("No aggregated sessions to load; skipping {} write", mode.as_str());
            return Ok(0);
        }

        for row in &mut rows {
            row.loaded_at = Some(loaded_at);
        }

        let written = match mode {
            RunMode::Incremental => self.destination.merge_rows(&rows).await,
            RunMode::Full => self.destination.replace_all(&rows).await,
        }
        .map_err(|err| {
            let cause = chain_to_string(&err);
            log_error!("Load of {} rows failed: {}", rows.len(), cause);
            EtlError::LoadFailed { cause }
        })?;

        log_info!(
            "Loaded {} sessions ({}) stamped {}",
            written,
            mode.as_str(),
            loaded_at.to_rfc3339()
        );
        Ok(written)
    }
}
