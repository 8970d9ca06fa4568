//! Logging infrastructure for admind
//!
//! Provides unified logging setup using the tracing ecosystem. The daemon
//! routes every log emission through the single global subscriber, so an
//! extra [`TapLayer`] can be chained in to observe the full stream (this is
//! how the log broadcaster feeds streaming clients).

use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::{paths, AdmindError, Result};

/// An extra layer tapped into the global subscriber stack
pub type TapLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Log output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Log to stderr (for client)
    Stderr,
    /// Log to file (for daemon)
    File,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output destination
    pub output: LogOutput,
    /// Log level filter (e.g. "info", "debug", "admind=debug")
    pub filter: String,
    /// Include file/line in logs
    pub file_line: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "info".into(),
            file_line: false,
        }
    }
}

impl LogConfig {
    /// Create config for the client (stderr only)
    pub fn client() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: std::env::var("ADMIND_LOG").unwrap_or_else(|_| "warn".into()),
            file_line: false,
        }
    }

    /// Create config for the daemon (file logging)
    pub fn server() -> Self {
        Self {
            output: LogOutput::File,
            filter: std::env::var("ADMIND_LOG").unwrap_or_else(|_| "info".into()),
            file_line: true,
        }
    }

    /// Create config for development (verbose stderr)
    pub fn development() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "debug".into(),
            file_line: true,
        }
    }
}

/// Initialize logging with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    init_logging_inner(config, None)
}

/// Initialize logging with an extra tap layer chained into the stack
///
/// The tap sees every event the filter admits, before formatting.
pub fn init_logging_with_tap(config: LogConfig, tap: TapLayer) -> Result<()> {
    init_logging_inner(config, Some(tap))
}

fn init_logging_inner(config: LogConfig, tap: Option<TapLayer>) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| AdmindError::config(format!("Invalid log filter: {}", e)))?;

    match config.output {
        LogOutput::Stderr => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line)
                .with_writer(std::io::stderr);

            tracing_subscriber::registry()
                .with(tap)
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|e| AdmindError::internal(format!("Failed to init logging: {}", e)))?;
        }
        LogOutput::File => {
            let log_dir = paths::log_dir();
            std::fs::create_dir_all(&log_dir).map_err(|e| AdmindError::FileWrite {
                path: log_dir.clone(),
                source: e,
            })?;

            let log_path = log_dir.join("admind.log");
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .map_err(|e| AdmindError::FileWrite {
                    path: log_path,
                    source: e,
                })?;

            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line)
                .with_writer(file)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(tap)
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|e| AdmindError::internal(format!("Failed to init logging: {}", e)))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.output, LogOutput::Stderr);
        assert_eq!(config.filter, "info");
    }

    #[test]
    fn test_log_config_client() {
        let config = LogConfig::client();
        assert_eq!(config.output, LogOutput::Stderr);
    }

    #[test]
    fn test_log_config_server() {
        let config = LogConfig::server();
        assert_eq!(config.output, LogOutput::File);
        assert!(config.file_line);
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LogConfig {
            filter: "not[a=filter".into(),
            ..LogConfig::default()
        };
        assert!(init_logging_with_config(config).is_err());
    }
}
