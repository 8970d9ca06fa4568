//! Client side of the daemon connection
//!
//! One connection carries one request. The framed transport is used
//! directly; single-reply requests apply the configured timeout, streams
//! wait indefinitely.

use std::path::Path;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::debug;
use uuid::Uuid;

use admind_protocol::{
    ClientCodec, ClientMessage, ErrorCode, RequestPath, ServerMessage, PROTOCOL_VERSION,
};
use admind_utils::{AdmindError, Result};

pub struct Connection {
    framed: Framed<UnixStream, ClientCodec>,
    timeout: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Connection {
    /// Connect to the daemon and perform the handshake
    pub async fn connect(socket: &Path, timeout: Duration) -> Result<Self> {
        if !socket.exists() {
            return Err(AdmindError::DaemonNotRunning {
                path: socket.to_path_buf(),
            });
        }

        let stream = tokio::time::timeout(timeout, UnixStream::connect(socket))
            .await
            .map_err(|_| AdmindError::ConnectionTimeout {
                ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| AdmindError::connection(format!("{}: {}", socket.display(), e)))?;

        let mut conn = Self {
            framed: Framed::new(stream, ClientCodec::new()),
            timeout,
        };

        conn.send(ClientMessage::Connect {
            client_id: Uuid::new_v4(),
            protocol_version: PROTOCOL_VERSION,
        })
        .await?;

        match conn.recv().await? {
            ServerMessage::Connected {
                server_version,
                protocol_version,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(AdmindError::ProtocolMismatch {
                        client: PROTOCOL_VERSION,
                        server: protocol_version,
                    });
                }
                debug!("Connected to admind {}", server_version);
                Ok(conn)
            }
            ServerMessage::Error { code, message } => Err(map_server_error(code, message)),
            other => Err(AdmindError::protocol(format!(
                "unexpected handshake reply: {:?}",
                other
            ))),
        }
    }

    /// Send the connection's single request
    pub async fn request(&mut self, path: RequestPath) -> Result<()> {
        self.send(ClientMessage::Request { path }).await
    }

    async fn send(&mut self, msg: ClientMessage) -> Result<()> {
        self.framed
            .send(msg)
            .await
            .map_err(|e| AdmindError::protocol(e.to_string()))
    }

    /// Receive one reply within the configured timeout
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        tokio::time::timeout(self.timeout, self.recv_wait())
            .await
            .map_err(|_| AdmindError::ConnectionTimeout {
                ms: self.timeout.as_millis() as u64,
            })?
    }

    /// Receive one message, waiting as long as it takes
    ///
    /// Used for log streams, where silence is normal.
    pub async fn recv_wait(&mut self) -> Result<ServerMessage> {
        match self.framed.next().await {
            Some(Ok(msg)) => Ok(msg),
            Some(Err(e)) => Err(AdmindError::protocol(e.to_string())),
            None => Err(AdmindError::ConnectionClosed),
        }
    }
}

/// Translate a wire error into the client error taxonomy
pub fn map_server_error(code: ErrorCode, message: String) -> AdmindError {
    match code {
        ErrorCode::AuthorizationDenied => AdmindError::AuthorizationDenied(message),
        ErrorCode::AlreadyStopping => AdmindError::AlreadyStopping,
        ErrorCode::ProtocolMismatch => AdmindError::protocol(message),
        ErrorCode::InvalidRequest => AdmindError::request(message),
        ErrorCode::InternalError => AdmindError::internal(message),
    }
}
