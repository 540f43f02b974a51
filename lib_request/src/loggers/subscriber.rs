//! # Tracing Subscriber Setup
//!
//! The dispatcher, gate and transport emit `tracing` events with structured
//! fields (`request_id`, `attempt`, `retry_count`, ...). Applications that do
//! not install their own subscriber can call [`setup_logging`] once at start.

use anyhow::Result;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable, one line per event.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Maps a level name to a filter; unknown names fall back to `info`.
pub fn level_filter(log_level: &str) -> LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// Installs a global subscriber.
///
/// `RUST_LOG` takes precedence when set; otherwise `log_level` applies to
/// every target.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn setup_logging(log_level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(log_level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}
