//! Logging for annote
//!
//! Logs go to daily-rotated `annote.log.<date>` files under
//! `$XDG_STATE_HOME/annote/`; the terminal belongs to the front end, so
//! nothing is written to stdout. Lines logged while a [`session_span`] is
//! entered carry the session label and data root.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Prefix of the rotated log files.
pub const LOG_FILE_PREFIX: &str = "annote.log";

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over the configured level. A configured level
/// that does not parse is an error rather than a silently empty log.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {e}")))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        _guard: guard,
        log_dir,
    })
}

/// Parse a level or directive list such as `info` or `annote_core::playback=debug,warn`.
pub fn level_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid log level {level:?}: {e}")))
}

/// Span to enter for as long as a session is open.
pub fn session_span(root: &Path, label: &str) -> tracing::Span {
    tracing::info_span!("session", label = %label, root = %root.display())
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: WorkerGuard,
    log_dir: PathBuf,
}

impl LoggingGuard {
    /// Directory holding the rotated log files.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_accepts_levels_and_directives() {
        assert!(level_filter("debug").is_ok());
        assert!(level_filter("annote_core::playback=trace,warn").is_ok());
    }

    #[test]
    fn test_level_filter_rejects_unknown_level() {
        let err = level_filter("annote_core=loud").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("annote_core=loud")));
    }
}
