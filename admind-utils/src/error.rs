//! Error types for admind
//!
//! Provides a unified error type used across all admind crates.

use std::path::PathBuf;

/// Main error type for admind operations
#[derive(Debug, thiserror::Error)]
pub enum AdmindError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Daemon not running at {path}")]
    DaemonNotRunning { path: PathBuf },

    #[error("Connection timeout after {ms}ms")]
    ConnectionTimeout { ms: u64 },

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    // === Protocol Errors ===

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Protocol version mismatch: client={client}, server={server}")]
    ProtocolMismatch { client: u32, server: u32 },

    // === Request Errors ===

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Daemon is already stopping")]
    AlreadyStopping,

    #[error("Session terminated by server")]
    TerminatedByServer,

    #[error("Request failed: {0}")]
    Request(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AdmindError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a request error
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::Connection(_)
        )
    }

    /// Process exit code for the CLI
    ///
    /// Distinguishes "denied" from "daemon unreachable" from everything
    /// else, so scripts can branch on the outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AuthorizationDenied(_) => 3,
            Self::DaemonNotRunning { .. }
            | Self::Connection(_)
            | Self::ConnectionTimeout { .. } => 2,
            _ => 1,
        }
    }
}

/// Result type alias using AdmindError
pub type Result<T> = std::result::Result<T, AdmindError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AdmindError::AuthorizationDenied("/service/Stop".into());
        assert_eq!(err.to_string(), "Authorization denied: /service/Stop");

        let err = AdmindError::AlreadyStopping;
        assert_eq!(err.to_string(), "Daemon is already stopping");
    }

    #[test]
    fn test_retryable() {
        assert!(AdmindError::ConnectionTimeout { ms: 500 }.is_retryable());
        assert!(!AdmindError::AlreadyStopping.is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: AdmindError = io_err.into();
        assert!(matches!(err, AdmindError::Io(_)));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AdmindError::AuthorizationDenied("x".into()).exit_code(), 3);
        assert_eq!(
            AdmindError::DaemonNotRunning { path: "/tmp/x".into() }.exit_code(),
            2
        );
        assert_eq!(AdmindError::connection("refused").exit_code(), 2);
        assert_eq!(AdmindError::AlreadyStopping.exit_code(), 1);
        assert_eq!(AdmindError::TerminatedByServer.exit_code(), 1);
    }
}
