//! Shared logging utilities for mindar.
//!
//! Two kinds of log:
//! - the process log, set up once by [`init_logging`] (daily file + stderr);
//! - a [`RunLog`] per processed subject, a plain file that is uploaded next
//!   to the results so a failed run can be inspected remotely.

mod run_log;

pub use run_log::RunLog;

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "mindar=info,mindar_db=info,mindar_ingest=info,mindar_storage=info,mindar_workflow=info";

/// Logging configuration for the mindar binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a daily rolling file writer and stderr output.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// whole process. When the logs directory cannot be created only stderr
/// logging is installed.
pub fn init_logging(config: LogConfig<'_>) -> Result<Option<WorkerGuard>> {
    let default_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let file_filter = default_filter();

    let console_filter = if config.verbose {
        EnvFilter::new(DEFAULT_LOG_FILTER.replace("=info", "=debug"))
    } else {
        default_filter()
    };

    let mut guard = None;
    let file_layer = match ensure_logs_dir() {
        Ok(dir) => {
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.app_name));
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(file_filter),
            )
        }
        Err(err) => {
            eprintln!("Warning: failed to create logs directory: {:#}", err);
            None
        }
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// Get the mindar home directory: ~/.mindar (or `$MINDAR_HOME`).
pub fn mindar_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("MINDAR_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mindar")
}

/// Get the logs directory: ~/.mindar/logs
pub fn logs_dir() -> PathBuf {
    mindar_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}
