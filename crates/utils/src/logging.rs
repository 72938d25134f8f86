//! provides logging helpers

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Directory for a daily rolling log file, next to stderr output.
pub const LOG_PATH_ENV: &str = "DESCHEDULER_LOG_PATH";
const LOG_FILE_PREFIX: &str = "descheduler.log";
const MAX_LOG_FILES: usize = 7;

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

fn file_appender(dir: &Path) -> Option<RollingFileAppender> {
    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
    {
        Ok(appender) => Some(appender),
        Err(e) => {
            eprintln!("failed to create log file in {}: {e}", dir.display());
            None
        }
    }
}

/// initiate the global tracing subscriber
///
/// The returned guard flushes the log file and must be held until exit.
pub fn init() -> Option<WorkerGuard> {
    let stderr_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let log_dir = std::env::var_os(LOG_PATH_ENV).filter(|dir| !dir.is_empty());
    let Some(appender) = log_dir.as_deref().map(Path::new).and_then(file_appender) else {
        registry().with(stderr_layer).init();
        return None;
    };

    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let file_layer = layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(env_filter());

    registry().with(stderr_layer).with(file_layer).init();
    Some(file_guard)
}
