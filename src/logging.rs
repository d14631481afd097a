//! Tracing subscriber setup for hosts that have none of their own.
//!
//! Logs go to stderr only. Nothing logged here ever reaches the terminal
//! or server byte sinks.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Install a global subscriber.
///
/// `verbosity` maps 0..=4 to error..trace for this crate; `RUST_LOG`
/// overrides it. Fails with [`TransferError::Config`] if a global
/// subscriber is already set.
pub fn init_logging(verbosity: u8, format: LogFormat) -> Result<()> {
    let level = level_for(verbosity);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("trzsz_filter={}", level)));

    let result = match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(verbosity >= 3)
                    .with_line_number(verbosity >= 3),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    result.map_err(|e| TransferError::Config(format!("logging already initialized: {}", e)))
}
