use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::destination::Destination;
use crate::error::{chain_to_string, EtlError};
use crate::models::{ExtractionWindow, RunMode, WatermarkField};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Decides which time range a run extracts.
pub struct WatermarkManager {
    destination: Arc<dyn Destination>,
    field: WatermarkField,
    dataset_origin: DateTime<Utc>,
}

impl WatermarkManager {
    pub fn new(
        destination: Arc<dyn Destination>,
        field: WatermarkField,
        dataset_origin: DateTime<Utc>,
    ) -> Self {
        Self {
            destination,
            field,
            dataset_origin,
        }
    }

    /// Window ending at `now`. Full runs start at the dataset origin; incremental
    /// runs start at the destination's stored watermark, or at the origin when
    /// the destination is still empty. `explicit_start` overrides both.
    pub async fn resolve_window(
        &self,
        mode: RunMode,
        explicit_start: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<ExtractionWindow, EtlError> {
        let start = match (explicit_start, mode) {
            (Some(start), _) => {
                log_info!("Using explicit window start {}", start.to_rfc3339());
                start
            }
            (None, RunMode::Full) => self.dataset_origin,
            (None, RunMode::Incremental) => {
                let watermark = self
                    .destination
                    .read_watermark(self.field)
                    .await
                    .map_err(|err| EtlError::WatermarkUnavailable {
                        cause: chain_to_string(&err),
                    })?;

                match watermark {
                    Some(ts) => ts,
                    None => {
                        log_info!(
                            "Destination has no {} yet; first incremental run falls back to the full window",
                            self.field.column()
                        );
                        self.dataset_origin
                    }
                }
            }
        };

        let window = ExtractionWindow::new(start, now);
        if window.is_empty() {
            log_warn!(
                "Window start {} is not before run start {}; nothing will be extracted",
                start.to_rfc3339(),
                now.to_rfc3339()
            );
        }
        Ok(window)
    }
}
