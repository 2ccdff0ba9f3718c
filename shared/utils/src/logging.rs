use anyhow::{Context, Result};
use std::fs::OpenOptions;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global subscriber. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = build_layer(config)?;

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .try_init()
        .context("Logging already initialized")?;

    tracing::info!(level = %config.level, format = %config.format, "Logging initialized");
    Ok(())
}

fn build_layer(config: &LoggingConfig) -> Result<BoxedLayer> {
    let json = config.format.eq_ignore_ascii_case("json");

    let layer: BoxedLayer = match (&config.file_path, json) {
        (Some(path), true) => Box::new(
            fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(open_log_file(path)?),
        ),
        (Some(path), false) => Box::new(
            fmt::layer()
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(open_log_file(path)?),
        ),
        (None, true) => Box::new(
            fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_thread_ids(true),
        ),
        (None, false) => Box::new(fmt::layer().with_target(true).with_thread_ids(true)),
    };

    Ok(layer)
}

fn open_log_file(path: &str) -> Result<std::sync::Mutex<std::fs::File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path))?;
    Ok(std::sync::Mutex::new(file))
}
