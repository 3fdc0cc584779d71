//! Tracing setup
//!
//! Logs go to stderr, as text or JSON lines. With a log directory configured a
//! daily-rolling file receives the same events.

use crate::config::LoggingConfig;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{filter::ParseError, fmt, EnvFilter, Layer};

/// File name prefix of rolled log files
pub const LOG_FILE_PREFIX: &str = "labmux.log";

/// Logging setup errors
#[derive(Error, Debug)]
pub enum LoggingError {
    /// Level or directive string is invalid
    #[error("Invalid log filter: {0}")]
    Filter(#[from] ParseError),

    /// A global subscriber is already installed
    #[error("Logging already initialised: {0}")]
    Init(#[from] TryInitError),
}

/// Keeps the file writer flushing; drop it last
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Build the filter; `RUST_LOG` wins over the configured level
pub fn build_filter(level: &str) -> Result<EnvFilter, ParseError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level),
    }
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> Result<LogGuard, LoggingError> {
    install(build_filter(&config.level)?, config)
}

fn install(filter: EnvFilter, config: &LoggingConfig) -> Result<LogGuard, LoggingError> {
    let console = if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;

    Ok(LogGuard { _file: guard })
}
