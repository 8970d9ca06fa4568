//! admind daemon
//!
//! A privileged administration daemon controlled over a local Unix socket.
//! Clients connect, authenticate via peer credentials, and issue one
//! request per connection: stop the daemon, stream its logs, or query
//! version and status.

pub mod authorize;
pub mod broadcast;
pub mod config;
pub mod dispatch;
pub mod registry;
pub mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tracing::{debug, info, warn};

use admind_utils::{paths, Result};

use crate::authorize::Gate;
use crate::broadcast::LogBroadcaster;
use crate::config::AppConfig;
use crate::dispatch::DispatcherContext;
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;

/// How long to wait for in-flight connection tasks to flush their final
/// frames before the process exits
const FLUSH_WAIT: Duration = Duration::from_secs(1);

/// The daemon: a bound listener plus its shared state
pub struct Daemon {
    listener: UnixListener,
    socket_path: PathBuf,
    ctx: Arc<DispatcherContext>,
}

impl Daemon {
    /// Bind the daemon's socket and assemble its state
    ///
    /// A stale socket file from a previous run is removed first; a live
    /// daemon would be holding the listener, not just the file.
    pub fn bind(
        config: &AppConfig,
        gate: Arc<dyn Gate>,
        broadcaster: Arc<LogBroadcaster>,
    ) -> Result<Self> {
        let socket_path = config.socket();
        if let Some(parent) = socket_path.parent() {
            paths::ensure_dir(&parent.to_path_buf())?;
        }
        if socket_path.exists() {
            debug!("Removing stale socket {}", socket_path.display());
            std::fs::remove_file(&socket_path)?;
        }

        let listener = UnixListener::bind(&socket_path)?;

        let registry = Arc::new(SessionRegistry::new());
        let coordinator = Arc::new(ShutdownCoordinator::with_drain_poll(
            Arc::clone(&registry),
            config.drain_poll(),
        ));

        let ctx = Arc::new(DispatcherContext {
            registry,
            broadcaster,
            coordinator,
            gate,
        });

        Ok(Self {
            listener,
            socket_path,
            ctx,
        })
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    pub fn context(&self) -> Arc<DispatcherContext> {
        Arc::clone(&self.ctx)
    }

    /// Accept connections until a stop request completes
    ///
    /// Each accepted connection runs in its own task. After the exit
    /// signal, waits briefly for in-flight tasks to flush their final
    /// frames (the stop reply, Terminated notices), then removes the
    /// socket file.
    pub async fn run(self) -> Result<()> {
        info!("Daemon listening on {}", self.socket_path.display());
        let exit = self.ctx.coordinator.exit_token();
        let mut tasks = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                _ = exit.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let ctx = Arc::clone(&self.ctx);
                            tasks.spawn(async move {
                                if let Err(e) = dispatch::handle_connection(ctx, stream).await {
                                    warn!("Connection handler failed: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                        }
                    }
                }
                // Reap finished tasks so the set does not grow unbounded
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        let _ = tokio::time::timeout(FLUSH_WAIT, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!("Failed to remove socket {}: {}", self.socket_path.display(), e);
            }
        }
        info!("Daemon stopped");
        Ok(())
    }
}
