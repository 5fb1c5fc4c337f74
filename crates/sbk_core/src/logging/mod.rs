//! Logging infrastructure for the songbook builder.
//!
//! This module provides:
//! - Per-build loggers with file + GUI callback dual output
//! - Message sinks the build supervisor reports into
//! - Tail buffer for error diagnosis
//! - Integration with the `tracing` ecosystem
//!
//! # Example
//!
//! ```no_run
//! use sbk_core::logging::{BuildLogger, LogConfig, MessageSink};
//!
//! let logger = BuildLogger::new("mybook", "/path/to/logs", LogConfig::default(), None).unwrap();
//!
//! logger.phase("tex");
//! logger.message("starting tex");
//! logger.success("Songbook built");
//! ```

mod build_logger;
mod sink;
mod types;

pub use build_logger::{BuildLogger, BuildLoggerBuilder};
pub use sink::{ChannelSink, MessageSink, NullSink, RecordingSink, TracingSink};
pub use types::{GuiLogCallback, LogConfig, LogLevel, MessagePrefix};

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize global tracing subscriber for application-wide logging.
///
/// This sets up a subscriber that:
/// - Respects RUST_LOG environment variable
/// - Falls back to the provided default level
/// - Outputs to stderr
///
/// Should be called once at application startup.
pub fn init_tracing(default_level: LogLevel) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(env_filter(default_level))
        .init();
}

/// Initialize tracing with stderr output plus a daily rolling file in `log_dir`.
///
/// The returned guard flushes the file writer on drop; keep it alive for
/// the lifetime of the application. Falls back to stderr-only logging when
/// the directory cannot be created.
pub fn init_tracing_with_file(default_level: LogLevel, log_dir: &Path) -> Option<WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        init_tracing(default_level);
        tracing::warn!("Cannot create log directory {}: {}", log_dir.display(), e);
        return None;
    }

    let appender = tracing_appender::rolling::daily(log_dir, "sbk.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(env_filter(default_level))
        .init();

    Some(guard)
}

/// Initialize tracing for tests (only logs warnings and above).
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

fn env_filter(default_level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_str(default_level)))
}

/// Convert LogLevel to filter string.
fn level_to_filter_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}
