//! Wire data types shared between client and daemon

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Administrative request paths understood by the daemon
///
/// The rendered names (`/service/Stop` etc.) are stable identifiers: they
/// appear in the daemon's log stream and clients grep for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPath {
    /// Stop the daemon, gracefully or by severing every session
    Stop { force: bool },
    /// Stream the daemon's log output until disconnected
    Cat,
    /// Report the daemon version
    Version,
    /// Report shutdown state and session counts
    Status,
}

impl RequestPath {
    /// Whether this request opens a long-lived streaming session
    pub fn is_stream(&self) -> bool {
        matches!(self, RequestPath::Cat)
    }
}

impl fmt::Display for RequestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestPath::Stop { .. } => "/service/Stop",
            RequestPath::Cat => "/service/Cat",
            RequestPath::Version => "/service/Version",
            RequestPath::Status => "/service/Status",
        };
        f.write_str(name)
    }
}

/// Severity of a forwarded log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One log emission, as delivered to streaming subscribers
///
/// Immutable once created; every subscriber receives its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub level: LogLevel,
    pub message: String,
    /// Request path of the session that caused the emission, if any
    pub request_path: Option<String>,
}

impl LogEvent {
    /// Create an event stamped with the current wall-clock time
    pub fn now(level: LogLevel, message: impl Into<String>, request_path: Option<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        Self {
            timestamp_ms,
            level,
            message: message.into(),
            request_path,
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.request_path {
            Some(path) => write!(f, "{} {} {}", self.level, path, self.message),
            None => write!(f, "{} {}", self.level, self.message),
        }
    }
}

/// Shutdown state reported by `/service/Status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaemonState {
    Running,
    Draining,
    ForcedStop,
    Stopped,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DaemonState::Running => "running",
            DaemonState::Draining => "draining",
            DaemonState::ForcedStop => "forced-stop",
            DaemonState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One active session, as reported by `/service/Status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: u64,
    pub request_path: String,
    pub streaming: bool,
    /// Seconds since the session was registered
    pub age_secs: u64,
}
