//! Console logging setup
//!
//! `RUST_LOG` takes precedence over the configured level when it is set.

use foglet_core::LogLevel;
use tracing_subscriber::EnvFilter;

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// Install a console subscriber for the whole process
///
/// Returns false when a global subscriber was already installed, which is
/// the normal case when several peers share one test process.
pub fn init_console_logging(level: LogLevel) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok()
}
