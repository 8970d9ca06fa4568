//! Daemon shutdown state machine
//!
//! Two stop flavors share one coordinator. A graceful stop moves the daemon
//! to Draining: connections keep being served while existing streaming
//! sessions run to their natural end, then the process exits. A forced stop
//! evicts every session immediately and exits. Both paths end at Stopped
//! and cancel the exit token the accept loop selects on.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use admind_protocol::DaemonState;

use crate::registry::{SessionKind, SessionRegistry};

/// Default interval between drain re-checks
pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_millis(100);

/// Internal shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    ForcedStop,
    Stopped,
}

impl ShutdownState {
    /// Wire representation for `/service/Status`
    pub fn as_wire(&self) -> DaemonState {
        match self {
            ShutdownState::Running => DaemonState::Running,
            ShutdownState::Draining => DaemonState::Draining,
            ShutdownState::ForcedStop => DaemonState::ForcedStop,
            ShutdownState::Stopped => DaemonState::Stopped,
        }
    }
}

/// Error returned for a stop request the state machine cannot honor
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StopError {
    #[error("daemon is already stopping")]
    AlreadyStopping,
}

/// Coordinates the daemon's stop sequence
pub struct ShutdownCoordinator {
    state: Mutex<ShutdownState>,
    registry: Arc<SessionRegistry>,
    /// Cancelled once the daemon should exit; the accept loop and the
    /// main task select on this
    exit: CancellationToken,
    drain_poll: Duration,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self::with_drain_poll(registry, DEFAULT_DRAIN_POLL)
    }

    pub fn with_drain_poll(registry: Arc<SessionRegistry>, drain_poll: Duration) -> Self {
        Self {
            state: Mutex::new(ShutdownState::Running),
            registry,
            exit: CancellationToken::new(),
            drain_poll,
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.lock()
    }

    /// Token cancelled when the daemon should exit
    pub fn exit_token(&self) -> CancellationToken {
        self.exit.clone()
    }

    /// Request a stop
    ///
    /// Graceful stop returns as soon as draining has begun; the caller's
    /// reply goes out before the daemon exits. Forced stop is accepted
    /// while Running or Draining (as an escalation) and evicts every
    /// session before signalling exit. Any other repeat is refused.
    pub fn request_stop(self: &Arc<Self>, force: bool) -> Result<(), StopError> {
        let mut state = self.state.lock();

        match (*state, force) {
            (ShutdownState::Running, false) => {
                *state = ShutdownState::Draining;
                drop(state);

                info!("Daemon stopping: draining sessions");
                let coordinator = Arc::clone(self);
                tokio::spawn(async move { coordinator.drain().await });
                Ok(())
            }
            (ShutdownState::Running, true) | (ShutdownState::Draining, true) => {
                *state = ShutdownState::ForcedStop;
                drop(state);

                info!("Daemon stopping: forced, severing sessions");
                self.registry.evict_all();
                *self.state.lock() = ShutdownState::Stopped;
                self.exit.cancel();
                Ok(())
            }
            _ => Err(StopError::AlreadyStopping),
        }
    }

    /// Wait for streaming sessions to finish, then signal exit
    ///
    /// Only subscriber sessions hold the drain open; transient requests
    /// finish on their own within a round trip.
    async fn drain(self: Arc<Self>) {
        loop {
            if self.state() != ShutdownState::Draining {
                // A forced stop overtook the drain
                return;
            }

            let remaining = self.registry.count(Some(SessionKind::Subscriber));
            if remaining == 0 {
                break;
            }
            debug!("Draining: {} streaming sessions remain", remaining);

            tokio::select! {
                _ = self.registry.wait_removed() => {}
                _ = tokio::time::sleep(self.drain_poll) => {}
            }
        }

        let mut state = self.state.lock();
        if *state == ShutdownState::Draining {
            *state = ShutdownState::Stopped;
            drop(state);
            info!("Drain complete, daemon exiting");
            self.exit.cancel();
        }
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.state())
            .field("exit_cancelled", &self.exit.is_cancelled())
            .finish()
    }
}
