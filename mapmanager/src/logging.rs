//! Logging setup.
//!
//! Structured logging to a file and to stderr:
//! - Writes to `<log_dir>/<log_file>` (cleared on start)
//! - Compact human-readable lines on stderr, so stdout stays clean for
//!   JSON output
//! - Configurable via the `RUST_LOG` environment variable (default `info`)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Install the global subscriber with file and stderr output.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or the log file
/// cannot be cleared.
pub fn init_logging(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    init_logging_full(log_dir, log_file, true)
}

/// Install the global subscriber, optionally without the stderr layer.
///
/// Interactive front ends that draw progress bars pass `console = false`
/// and keep the log in the file only.
pub fn init_logging_full(
    log_dir: &Path,
    log_file: &str,
    console: bool,
) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    let stderr_layer = console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .compact()
    });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Default log directory: the platform cache dir, or `./logs`.
pub fn default_log_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("mapmanager"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    "mapmanager.log"
}
