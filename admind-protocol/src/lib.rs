//! admind-protocol: Shared IPC definitions for client-daemon communication
//!
//! This crate defines all message types and data structures used for
//! communication between admindctl and the admind daemon over Unix sockets.

pub mod codec;
pub mod messages;
pub mod types;

// Re-export main types at crate root
pub use codec::{ClientCodec, CodecError, ServerCodec};
pub use messages::{ClientMessage, ErrorCode, ServerMessage};
pub use types::{DaemonState, LogEvent, LogLevel, RequestPath, SessionSummary};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;
