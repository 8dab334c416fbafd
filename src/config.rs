use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregation::MetricRules;
use crate::models::WatermarkField;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_PATH_VAR: &str = "ETL_CONFIG";

/// Pipeline configuration: where the sources and destination live and how
/// runs behave. Missing JSON keys fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EtlConfig {
    pub posthog_db: PathBuf,
    pub firebase_db: PathBuf,
    pub destination_db: PathBuf,

    /// Start of the full-history window
    pub dataset_origin: DateTime<Utc>,
    pub watermark_field: WatermarkField,

    pub max_concurrent_queries: usize,
    /// Per-query deadline; `None` waits indefinitely
    pub query_timeout_secs: Option<u64>,

    /// Rebuild `people_aggregated` after every successful load
    pub people_rollup: bool,

    pub metrics: MetricRules,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            posthog_db: PathBuf::from("data/posthog.sqlite3"),
            firebase_db: PathBuf::from("data/firebase.sqlite3"),
            destination_db: PathBuf::from("data/sessions.sqlite3"),
            dataset_origin: default_origin(),
            watermark_field: WatermarkField::default(),
            max_concurrent_queries: 3,
            query_timeout_secs: None,
            people_rollup: true,
            metrics: MetricRules::default(),
        }
    }
}

fn default_origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

impl EtlConfig {
    /// Reads `path` when given and present, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse config at {}", path.display()))
            }
            _ => Ok(Self::default()),
        }
    }

    /// `ETL_CONFIG` file (if any) with `ETL_*` environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from);
        Self::load(path.as_deref())?.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`; empty values are ignored except for
    /// `ETL_ALLOWED_LIB`, where empty disables the SDK filter.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());
        let set = |key: &str| get(key).filter(|v| !v.is_empty());

        if let Some(path) = set("ETL_POSTHOG_DB") {
            self.posthog_db = PathBuf::from(path);
        }
        if let Some(path) = set("ETL_FIREBASE_DB") {
            self.firebase_db = PathBuf::from(path);
        }
        if let Some(path) = set("ETL_DESTINATION_DB") {
            self.destination_db = PathBuf::from(path);
        }
        if let Some(origin) = set("ETL_DATASET_ORIGIN") {
            self.dataset_origin = DateTime::parse_from_rfc3339(&origin)
                .with_context(|| format!("ETL_DATASET_ORIGIN is not RFC 3339: {origin}"))?
                .with_timezone(&Utc);
        }
        if let Some(field) = set("ETL_WATERMARK_FIELD") {
            self.watermark_field = field.parse()?;
        }
        if let Some(max) = set("ETL_MAX_CONCURRENT_QUERIES") {
            self.max_concurrent_queries = max
                .parse()
                .with_context(|| format!("ETL_MAX_CONCURRENT_QUERIES is not a number: {max}"))?;
        }
        if let Some(secs) = set("ETL_QUERY_TIMEOUT_SECS") {
            self.query_timeout_secs = Some(
                secs.parse()
                    .with_context(|| format!("ETL_QUERY_TIMEOUT_SECS is not a number: {secs}"))?,
            );
        }
        if let Some(ids) = set("ETL_EXCLUDED_DISTINCT_IDS") {
            self.metrics.excluded_distinct_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(lib) = get("ETL_ALLOWED_LIB") {
            self.metrics.allowed_lib = (!lib.is_empty()).then_some(lib);
        }
        if let Some(flag) = set("ETL_PEOPLE_ROLLUP") {
            self.people_rollup = parse_flag(&flag)
                .with_context(|| format!("ETL_PEOPLE_ROLLUP is not a boolean: {flag}"))?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_queries == 0 {
            bail!("max_concurrent_queries must be at least 1");
        }
        if self.query_timeout_secs == Some(0) {
            bail!("query_timeout_secs must be positive when set");
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("unrecognized flag '{other}'"),
    }
}
