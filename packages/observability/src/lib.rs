//! # Observability
//!
//! Shared logging setup for the alert relay services.
//!
//! Services call [`init_with_config`] once at startup and use standard
//! `tracing` macros throughout their code. Output is compact human-readable
//! lines on stderr, plus optional structured JSONL in a log file:
//!
//! - `tail -f alerts.jsonl | jq` for pretty JSON
//!
//! `RUST_LOG` overrides the configured default level.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() -> std::io::Result<()> {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "alert-subscriber".into(),
//!         default_level: "debug".into(),
//!         ..Default::default()
//!     })?;
//!
//!     tracing::info!("service started");
//!     Ok(())
//! }
//! ```

mod file;

pub use file::LogFileWriter;

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "alert-producer").
    /// Logged as the `service` field of the startup line, which is the
    /// first record of every run in the JSONL file.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional JSONL log file.
    pub log_path: Option<PathBuf>,

    /// Emit compact lines to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
        }
    }
}

impl LogConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_level))
    }
}

/// Initialize logging with custom configuration.
///
/// Fails if the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    let file_layer = match &config.log_path {
        Some(path) => {
            let writer = LogFileWriter::new(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(writer)
                    .with_filter(config.env_filter()),
            )
        }
        None => None,
    };

    let stderr_layer = if config.also_stderr {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(io::stderr)
                .with_filter(config.env_filter()),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    tracing::info!(
        service = %config.service_name,
        pid = std::process::id(),
        log_path = ?config.log_path,
        "observability initialized"
    );

    Ok(())
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(config.also_stderr);
    }

    // The only test that installs the global subscriber.
    #[test]
    fn test_startup_line_names_the_service() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.jsonl");

        init_with_config(LogConfig {
            service_name: "alert-producer".into(),
            default_level: "info".into(),
            log_path: Some(path.clone()),
            also_stderr: false,
        })
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let first = contents.lines().next().unwrap();
        assert!(first.contains("observability initialized"));
        assert!(first.contains(r#""service":"alert-producer""#));
    }
}
