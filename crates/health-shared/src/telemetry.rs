//! Logging initialization
//!
//! Integrity and audit-availability failures are emitted on [`ALERT_TARGET`]
//! so operators can route them separately from ordinary access denials.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// Log target for events that should page an operator
pub const ALERT_TARGET: &str = "carevault::alert";

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format {
        LogFormat::Pretty => fmt().with_env_filter(filter).with_target(true).try_init()?,
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init()?,
    }

    tracing::info!(level = %config.level, format = ?config.format, "logging initialized");
    Ok(())
}
