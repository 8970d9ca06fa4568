//! Request dispatch
//!
//! One task per connection. The connection is the session: after the
//! handshake the client sends exactly one request, the gate rules on it,
//! and the handler either answers and closes (transient requests) or
//! streams until disconnect or eviction (`/service/Cat`).

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use admind_protocol::{
    ClientMessage, ErrorCode, RequestPath, ServerCodec, ServerMessage, PROTOCOL_VERSION,
};
use admind_utils::{AdmindError, Result};

use crate::authorize::{CallerIdentity, Gate};
use crate::broadcast::{LogBroadcaster, SubscriberQueue};
use crate::registry::{SessionKind, SessionRegistry};
use crate::shutdown::ShutdownCoordinator;

/// Shared state handed to every connection task
pub struct DispatcherContext {
    pub registry: Arc<SessionRegistry>,
    pub broadcaster: Arc<LogBroadcaster>,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub gate: Arc<dyn Gate>,
}

type ServerFramed = Framed<UnixStream, ServerCodec>;

fn protocol_err(e: impl std::fmt::Display) -> AdmindError {
    AdmindError::protocol(e.to_string())
}

async fn send(framed: &mut ServerFramed, msg: ServerMessage) -> Result<()> {
    framed.send(msg).await.map_err(protocol_err)
}

/// Handle one client connection from handshake to close
pub async fn handle_connection(ctx: Arc<DispatcherContext>, stream: UnixStream) -> Result<()> {
    let caller = CallerIdentity::from_stream(&stream)?;
    let mut framed = Framed::new(stream, ServerCodec::new());

    // Handshake
    match framed.next().await {
        Some(Ok(ClientMessage::Connect {
            client_id,
            protocol_version,
        })) => {
            if protocol_version != PROTOCOL_VERSION {
                send(
                    &mut framed,
                    ServerMessage::Error {
                        code: ErrorCode::ProtocolMismatch,
                        message: format!(
                            "protocol version mismatch: client={}, server={}",
                            protocol_version, PROTOCOL_VERSION
                        ),
                    },
                )
                .await?;
                return Ok(());
            }
            debug!("Handshake from {} ({})", client_id, caller);
            send(
                &mut framed,
                ServerMessage::Connected {
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                    protocol_version: PROTOCOL_VERSION,
                },
            )
            .await?;
        }
        Some(Ok(_)) => {
            send(
                &mut framed,
                ServerMessage::Error {
                    code: ErrorCode::InvalidRequest,
                    message: "expected Connect".into(),
                },
            )
            .await?;
            return Ok(());
        }
        Some(Err(e)) => return Err(protocol_err(e)),
        None => return Ok(()),
    }

    // Wait for the single request, tolerating keepalive pings
    let path = loop {
        match framed.next().await {
            Some(Ok(ClientMessage::Request { path })) => break path,
            Some(Ok(ClientMessage::Ping)) => send(&mut framed, ServerMessage::Pong).await?,
            Some(Ok(ClientMessage::Connect { .. })) => {
                send(
                    &mut framed,
                    ServerMessage::Error {
                        code: ErrorCode::InvalidRequest,
                        message: "already connected".into(),
                    },
                )
                .await?;
                return Ok(());
            }
            Some(Err(e)) => return Err(protocol_err(e)),
            None => return Ok(()),
        }
    };

    // Authorize before any session state exists; a denied caller learns
    // nothing beyond the denial, and the log stream carries no trace of it
    if !ctx.gate.authorize(&caller, &path) {
        debug!("Authorization denied: {} for {}", path, caller);
        send(
            &mut framed,
            ServerMessage::Error {
                code: ErrorCode::AuthorizationDenied,
                message: format!("not authorized for {}", path),
            },
        )
        .await?;
        return Ok(());
    }

    let kind = if path.is_stream() {
        SessionKind::Subscriber
    } else {
        SessionKind::Transient
    };
    let (id, cancel) = ctx.registry.register(kind, path);

    info!("New connection from client");
    info!(request_path = %path, "New request {}", path);

    let result = match path {
        RequestPath::Version => {
            send(
                &mut framed,
                ServerMessage::Version {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            )
            .await
            .and(send(&mut framed, ServerMessage::Done).await)
        }
        RequestPath::Status => {
            let status = ServerMessage::Status {
                state: ctx.coordinator.state().as_wire(),
                sessions: ctx.registry.summaries(),
            };
            send(&mut framed, status)
                .await
                .and(send(&mut framed, ServerMessage::Done).await)
        }
        RequestPath::Stop { force } => match ctx.coordinator.request_stop(force) {
            Ok(()) => send(&mut framed, ServerMessage::Ok)
                .await
                .and(send(&mut framed, ServerMessage::Done).await),
            Err(_) => {
                send(
                    &mut framed,
                    ServerMessage::Error {
                        code: ErrorCode::AlreadyStopping,
                        message: "daemon is already stopping".into(),
                    },
                )
                .await
            }
        },
        RequestPath::Cat => {
            let queue = ctx.broadcaster.subscribe(id);
            let result = run_cat_session(framed, queue, &cancel).await;
            // Detach before logging completion so the departing subscriber
            // does not receive its own goodbye
            ctx.broadcaster.unsubscribe(id);
            result
        }
    };

    if let Err(ref e) = result {
        warn!(request_path = %path, "Request {} failed: {}", path, e);
    }
    info!(request_path = %path, "Request {} done", path);
    ctx.registry.deregister(id, &cancel);

    result
}

/// Stream log events to one subscriber until it leaves or is evicted
async fn run_cat_session(
    framed: ServerFramed,
    queue: Arc<SubscriberQueue>,
    cancel: &CancellationToken,
) -> Result<()> {
    let (mut sink, mut stream) = framed.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Forced stop: tell the client before the socket drops
                sink.send(ServerMessage::Terminated)
                    .await
                    .map_err(protocol_err)?;
                sink.flush().await.map_err(protocol_err)?;
                return Ok(());
            }
            event = queue.pop() => {
                sink.send(ServerMessage::LogLine { event })
                    .await
                    .map_err(protocol_err)?;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(ClientMessage::Ping)) => {
                        sink.send(ServerMessage::Pong).await.map_err(protocol_err)?;
                    }
                    Some(Ok(_)) | Some(Err(_)) | None => {
                        // Client went away or misbehaved; end of stream
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admind_protocol::ClientCodec;
    use admind_utils::Result as UtilsResult;
    use std::time::Duration;
    use uuid::Uuid;

    use crate::authorize::PolicyGate;

    fn context(gate: Arc<dyn Gate>) -> Arc<DispatcherContext> {
        let registry = Arc::new(SessionRegistry::new());
        let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&registry)));
        Arc::new(DispatcherContext {
            registry,
            broadcaster: Arc::new(LogBroadcaster::new(32)),
            coordinator,
            gate,
        })
    }

    fn allow_all() -> Arc<dyn Gate> {
        Arc::new(PolicyGate::new(|_, _| true))
    }

    async fn connected_client(
        ctx: Arc<DispatcherContext>,
    ) -> (
        Framed<UnixStream, ClientCodec>,
        tokio::task::JoinHandle<UtilsResult<()>>,
    ) {
        let (client_side, server_side) = UnixStream::pair().unwrap();
        let server = tokio::spawn(handle_connection(ctx, server_side));

        let mut client = Framed::new(client_side, ClientCodec::new());
        client
            .send(ClientMessage::Connect {
                client_id: Uuid::new_v4(),
                protocol_version: PROTOCOL_VERSION,
            })
            .await
            .unwrap();

        match client.next().await.unwrap().unwrap() {
            ServerMessage::Connected { .. } => {}
            other => panic!("expected Connected, got {:?}", other),
        }

        (client, server)
    }

    #[tokio::test]
    async fn test_version_request() {
        let ctx = context(allow_all());
        let (mut client, server) = connected_client(ctx).await;

        client
            .send(ClientMessage::Request {
                path: RequestPath::Version,
            })
            .await
            .unwrap();

        match client.next().await.unwrap().unwrap() {
            ServerMessage::Version { version } => {
                assert_eq!(version, env!("CARGO_PKG_VERSION"));
            }
            other => panic!("expected Version, got {:?}", other),
        }
        assert_eq!(client.next().await.unwrap().unwrap(), ServerMessage::Done);

        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_protocol_mismatch_rejected() {
        let ctx = context(allow_all());
        let (client_side, server_side) = UnixStream::pair().unwrap();
        let server = tokio::spawn(handle_connection(ctx, server_side));

        let mut client = Framed::new(client_side, ClientCodec::new());
        client
            .send(ClientMessage::Connect {
                client_id: Uuid::new_v4(),
                protocol_version: PROTOCOL_VERSION + 1,
            })
            .await
            .unwrap();

        match client.next().await.unwrap().unwrap() {
            ServerMessage::Error { code, .. } => {
                assert_eq!(code, ErrorCode::ProtocolMismatch);
            }
            other => panic!("expected Error, got {:?}", other),
        }

        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_denied_request_creates_no_session() {
        let ctx = context(Arc::new(PolicyGate::new(|_, _| false)));
        let registry = Arc::clone(&ctx.registry);
        let (mut client, server) = connected_client(ctx).await;

        client
            .send(ClientMessage::Request {
                path: RequestPath::Status,
            })
            .await
            .unwrap();

        match client.next().await.unwrap().unwrap() {
            ServerMessage::Error { code, .. } => {
                assert_eq!(code, ErrorCode::AuthorizationDenied);
            }
            other => panic!("expected Error, got {:?}", other),
        }

        server.await.unwrap().unwrap();
        assert_eq!(registry.count(None), 0);
    }

    #[tokio::test]
    async fn test_ping_before_request() {
        let ctx = context(allow_all());
        let (mut client, server) = connected_client(ctx).await;

        client.send(ClientMessage::Ping).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap(), ServerMessage::Pong);

        client
            .send(ClientMessage::Request {
                path: RequestPath::Version,
            })
            .await
            .unwrap();
        assert!(matches!(
            client.next().await.unwrap().unwrap(),
            ServerMessage::Version { .. }
        ));

        drop(client);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_status_reports_own_session() {
        let ctx = context(allow_all());
        let (mut client, server) = connected_client(ctx).await;

        client
            .send(ClientMessage::Request {
                path: RequestPath::Status,
            })
            .await
            .unwrap();

        match client.next().await.unwrap().unwrap() {
            ServerMessage::Status { state, sessions } => {
                assert_eq!(state, admind_protocol::DaemonState::Running);
                assert_eq!(sessions.len(), 1);
                assert_eq!(sessions[0].request_path, "/service/Status");
                assert!(!sessions[0].streaming);
            }
            other => panic!("expected Status, got {:?}", other),
        }

        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cat_receives_published_events() {
        let ctx = context(allow_all());
        let broadcaster = Arc::clone(&ctx.broadcaster);
        let registry = Arc::clone(&ctx.registry);
        let (mut client, server) = connected_client(ctx).await;

        client
            .send(ClientMessage::Request {
                path: RequestPath::Cat,
            })
            .await
            .unwrap();

        // Wait for the subscription to land
        tokio::time::timeout(Duration::from_secs(1), async {
            while broadcaster.subscriber_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        broadcaster.publish(admind_protocol::LogEvent::now(
            admind_protocol::LogLevel::Info,
            "hello subscriber",
            None,
        ));

        match client.next().await.unwrap().unwrap() {
            ServerMessage::LogLine { event } => {
                assert_eq!(event.message, "hello subscriber");
            }
            other => panic!("expected LogLine, got {:?}", other),
        }

        // Disconnect ends the stream and cleans up
        drop(client);
        server.await.unwrap().unwrap();
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(registry.count(None), 0);
    }

    #[tokio::test]
    async fn test_cat_terminated_on_eviction() {
        let ctx = context(allow_all());
        let registry = Arc::clone(&ctx.registry);
        let (mut client, server) = connected_client(ctx).await;

        client
            .send(ClientMessage::Request {
                path: RequestPath::Cat,
            })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while registry.count(None) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        registry.evict_all();

        assert_eq!(
            client.next().await.unwrap().unwrap(),
            ServerMessage::Terminated
        );
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_requests_still_served_while_draining() {
        let ctx = context(allow_all());
        // Hold the drain open so the daemon stays in Draining
        let (_id, _cancel) = ctx
            .registry
            .register(SessionKind::Subscriber, RequestPath::Cat);
        ctx.coordinator.request_stop(false).unwrap();

        // In-flight administrative work is not starved by the drain
        let (mut client, server) = connected_client(ctx).await;
        client
            .send(ClientMessage::Request {
                path: RequestPath::Version,
            })
            .await
            .unwrap();

        assert!(matches!(
            client.next().await.unwrap().unwrap(),
            ServerMessage::Version { .. }
        ));
        server.await.unwrap().unwrap();
    }
}
