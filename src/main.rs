use std::process::ExitCode;

use anyhow::{Context, Result};
use session_etl::{EtlConfig, Pipeline, RunMode, RunOptions};

fn run_options_from_env() -> Result<RunOptions> {
    let mode: RunMode = std::env::var("ETL_MODE").unwrap_or_default().parse()?;
    let limit = match std::env::var("ETL_LIMIT") {
        Ok(raw) if !raw.trim().is_empty() => Some(
            raw.trim()
                .parse::<u64>()
                .with_context(|| format!("ETL_LIMIT is not a positive integer: {raw}"))?,
        ),
        _ => None,
    };
    RunOptions::new(mode, limit)
}

async fn run() -> Result<bool> {
    let config = EtlConfig::from_env()?;
    let options = run_options_from_env()?;
    let pipeline = Pipeline::from_config(&config)?;

    let result = pipeline.run(options).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("session-etl could not start: {err:#}");
            ExitCode::from(2)
        }
    }
}
