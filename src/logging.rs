use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::config::{AppConfig, LogFormat};

pub const DEFAULT_FILTER: &str = "autosentinel=info,autosentinel_lib=info,tower_http=info";
pub const LOG_FILE_PREFIX: &str = "autosentinel.log";

/// Keeps the file writer flushing; drop it only on shutdown.
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn env_filter() -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER).context("build default log filter"),
    }
}

/// Install the global subscriber: stdout in the configured format, plus a
/// daily-rotated JSON file under `log_dir` when one is set.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<LoggingGuard> {
    tracing_log::LogTracer::init().context("bridge log records into tracing")?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let stdout = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_filter(env_filter()?)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_filter(env_filter()?)
            .boxed(),
    };
    layers.push(stdout);

    let mut file_guard = None;
    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter()?)
                .boxed(),
        );
        file_guard = Some(guard);
    }

    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
        .context("install tracing subscriber")?;

    tracing::info!(
        target: "autosentinel",
        event = "logging_ready",
        format = ?config.log_format,
        log_dir = ?config.log_dir
    );

    Ok(LoggingGuard { _file: file_guard })
}
