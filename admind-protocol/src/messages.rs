//! Client-daemon message types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::*;

/// Messages sent from client to daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Initial connection handshake
    Connect {
        client_id: Uuid,
        protocol_version: u32,
    },

    /// Invoke an administrative command
    ///
    /// Exactly one request is accepted per connection; the connection is
    /// the session.
    Request { path: RequestPath },

    /// Ping for keepalive
    Ping,
}

/// Messages sent from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Connection accepted
    Connected {
        server_version: String,
        protocol_version: u32,
    },

    /// Request accepted with no further payload (e.g. Stop)
    Ok,

    /// Version report
    Version { version: String },

    /// Daemon status report
    Status {
        state: DaemonState,
        sessions: Vec<SessionSummary>,
    },

    /// One forwarded log event (Cat stream)
    LogLine { event: LogEvent },

    /// The daemon forcibly severed this session
    ///
    /// Distinct from a clean end-of-stream: clients surface this as
    /// "terminated by server".
    Terminated,

    /// Request completed; no more messages follow
    Done,

    /// Error response
    Error { code: ErrorCode, message: String },

    /// Pong response to ping
    Pong,
}

/// Error codes for protocol errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    /// The authorization gate declined the request
    AuthorizationDenied,
    /// Stop requested while the daemon is already draining or stopped
    AlreadyStopping,
    /// Client and daemon protocol versions differ
    ProtocolMismatch,
    /// Malformed or out-of-order message
    InvalidRequest,
    InternalError,
}
