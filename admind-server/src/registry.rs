//! Session registry
//!
//! Tracks every currently-connected client session. This is the single
//! source of truth for "who is connected right now": the dispatcher
//! registers a session per authorized request, the shutdown coordinator
//! watches the count to decide when the daemon may exit, and forced stop
//! evicts everything through here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use admind_protocol::{RequestPath, SessionSummary};

/// Unique session identifier
///
/// Monotonically assigned, never reused for the lifetime of the process.
/// Allocation is process-wide, not per registry, so an id stays meaningful
/// to anything keyed on it (the log broadcaster) no matter which registry
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// Create a SessionId from a raw value (mainly for testing)
    #[cfg(test)]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session({})", self.0)
    }
}

/// Session lifetime class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Runs one request to completion and closes
    Transient,
    /// Long-lived log stream; stays open until disconnect or eviction
    Subscriber,
}

/// Entry for an active session
pub struct SessionEntry {
    pub kind: SessionKind,
    pub request_path: RequestPath,
    pub started_at: SystemTime,
    /// Cancelling this unblocks the session's task; invoked at most once
    /// by [`SessionRegistry::evict_all`].
    cancel: CancellationToken,
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("kind", &self.kind)
            .field("request_path", &self.request_path.to_string())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Registry tracking all active sessions
///
/// Thread-safe for concurrent access from any number of session tasks.
pub struct SessionRegistry {
    /// Session ID -> session entry
    sessions: DashMap<SessionId, SessionEntry>,
    /// Woken whenever a session is removed, so the shutdown coordinator
    /// can observe drain progress without tight polling
    removed: Notify,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create a new empty session registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            removed: Notify::new(),
        }
    }

    /// Register a new session
    ///
    /// Returns the assigned SessionId and the session's cancellation
    /// handle. The handle is owned by the session's task; `evict_all`
    /// cancels it to sever the session.
    pub fn register(&self, kind: SessionKind, request_path: RequestPath) -> (SessionId, CancellationToken) {
        let id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst));
        let cancel = CancellationToken::new();

        let entry = SessionEntry {
            kind,
            request_path,
            started_at: SystemTime::now(),
            cancel: cancel.clone(),
        };

        self.sessions.insert(id, entry);
        debug!("Registered {} ({:?}, {})", id, kind, request_path);

        (id, cancel)
    }

    /// Deregister a session at the end of its handling
    ///
    /// Returns false if the entry is already gone. When the session's
    /// token is cancelled that just means `evict_all` removed the entry
    /// while the session was finishing; anything else is a programming
    /// error and logged loudly.
    pub fn deregister(&self, id: SessionId, cancel: &CancellationToken) -> bool {
        match self.sessions.remove(&id) {
            Some(_) => {
                debug!("Deregistered {}", id);
                self.removed.notify_waiters();
                true
            }
            None if cancel.is_cancelled() => {
                debug!("{} already removed by eviction", id);
                false
            }
            None => {
                error!("Attempted to deregister unknown {}", id);
                false
            }
        }
    }

    /// Number of active sessions, optionally filtered by kind
    pub fn count(&self, filter: Option<SessionKind>) -> usize {
        match filter {
            None => self.sessions.len(),
            Some(kind) => self
                .sessions
                .iter()
                .filter(|entry| entry.kind == kind)
                .count(),
        }
    }

    /// Snapshot of active sessions for status reporting
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| SessionSummary {
                id: entry.key().value(),
                request_path: entry.request_path.to_string(),
                streaming: entry.kind == SessionKind::Subscriber,
                age_secs: entry
                    .started_at
                    .elapsed()
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
            })
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    /// Evict every active session
    ///
    /// Cancels each session's token exactly once and removes the entry.
    /// Idempotent: calling this on an empty registry is a no-op. Each
    /// session's task observes the cancellation, sends its termination
    /// notice, and exits.
    pub fn evict_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();

        for id in ids {
            // Cancel before removing: a session finishing naturally in
            // this window then sees its cancelled token and knows the
            // missing entry is eviction, not a bug
            if let Some(entry) = self.sessions.get(&id) {
                entry.cancel.cancel();
            }
            if self.sessions.remove(&id).is_some() {
                debug!("Evicted {}", id);
            }
        }

        self.removed.notify_waiters();
    }

    /// Wait until some session is removed
    ///
    /// Used by the shutdown coordinator alongside a bounded poll interval.
    pub async fn wait_removed(&self) {
        self.removed.notified().await;
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn registry() -> SessionRegistry {
        SessionRegistry::new()
    }

    #[test]
    fn test_registry_new() {
        let reg = registry();
        assert_eq!(reg.count(None), 0);
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new(42);
        assert_eq!(format!("{}", id), "Session(42)");
    }

    #[test]
    fn test_register_assigns_monotonic_ids() {
        let reg = registry();

        let (id1, _c1) = reg.register(SessionKind::Transient, RequestPath::Version);
        let (id2, _c2) = reg.register(SessionKind::Subscriber, RequestPath::Cat);
        let (id3, _c3) = reg.register(SessionKind::Transient, RequestPath::Status);

        assert!(id1.value() < id2.value());
        assert!(id2.value() < id3.value());
        assert_eq!(reg.count(None), 3);
    }

    #[test]
    fn test_ids_never_reused() {
        let reg = registry();

        let (id1, c1) = reg.register(SessionKind::Transient, RequestPath::Version);
        assert!(reg.deregister(id1, &c1));

        let (id2, _c) = reg.register(SessionKind::Transient, RequestPath::Version);
        assert_ne!(id1, id2);
        assert!(id2.value() > id1.value());
    }

    #[test]
    fn test_ids_unique_across_registries() {
        // Allocation is process-wide: two registries never hand out the
        // same id, so broadcaster subscriptions keyed on ids cannot collide
        let reg_a = registry();
        let reg_b = registry();

        let (id_a, _ca) = reg_a.register(SessionKind::Subscriber, RequestPath::Cat);
        let (id_b, _cb) = reg_b.register(SessionKind::Subscriber, RequestPath::Cat);

        assert_ne!(id_a, id_b);
    }

    #[test]
    fn test_deregister() {
        let reg = registry();
        let (id, cancel) = reg.register(SessionKind::Transient, RequestPath::Version);

        assert_eq!(reg.count(None), 1);
        assert!(reg.deregister(id, &cancel));
        assert_eq!(reg.count(None), 0);
    }

    #[test]
    fn test_deregister_unknown_returns_false() {
        let reg = registry();
        assert!(!reg.deregister(SessionId::new(u64::MAX), &CancellationToken::new()));
        assert_eq!(reg.count(None), 0);
    }

    #[test]
    fn test_deregister_twice_returns_false() {
        let reg = registry();
        let (id, cancel) = reg.register(SessionKind::Transient, RequestPath::Version);

        assert!(reg.deregister(id, &cancel));
        assert!(!reg.deregister(id, &cancel));
        assert_eq!(reg.count(None), 0);
    }

    #[test]
    fn test_count_by_kind() {
        let reg = registry();

        reg.register(SessionKind::Transient, RequestPath::Version);
        reg.register(SessionKind::Subscriber, RequestPath::Cat);
        reg.register(SessionKind::Subscriber, RequestPath::Cat);

        assert_eq!(reg.count(None), 3);
        assert_eq!(reg.count(Some(SessionKind::Transient)), 1);
        assert_eq!(reg.count(Some(SessionKind::Subscriber)), 2);
    }

    #[test]
    fn test_summaries() {
        let reg = registry();
        reg.register(SessionKind::Subscriber, RequestPath::Cat);
        reg.register(SessionKind::Transient, RequestPath::Status);

        let summaries = reg.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].request_path, "/service/Cat");
        assert!(summaries[0].streaming);
        assert_eq!(summaries[1].request_path, "/service/Status");
        assert!(!summaries[1].streaming);
    }

    #[test]
    fn test_evict_all_cancels_each_session_once() {
        let reg = registry();

        let (_id1, c1) = reg.register(SessionKind::Subscriber, RequestPath::Cat);
        let (_id2, c2) = reg.register(SessionKind::Transient, RequestPath::Version);

        assert!(!c1.is_cancelled());
        assert!(!c2.is_cancelled());

        reg.evict_all();

        assert!(c1.is_cancelled());
        assert!(c2.is_cancelled());
        assert_eq!(reg.count(None), 0);
    }

    #[test]
    fn test_evict_all_on_empty_registry_is_noop() {
        let reg = registry();
        reg.evict_all();
        reg.evict_all();
        assert_eq!(reg.count(None), 0);
    }

    #[test]
    fn test_deregister_after_evict_returns_false() {
        let reg = registry();
        let (id, cancel) = reg.register(SessionKind::Subscriber, RequestPath::Cat);

        reg.evict_all();

        // The session's own deregistration finds the entry gone and its
        // token cancelled: eviction overlap, not a programming error
        assert!(cancel.is_cancelled());
        assert!(!reg.deregister(id, &cancel));
    }

    #[tokio::test]
    async fn test_wait_removed_wakes_on_deregister() {
        let reg = Arc::new(registry());
        let (id, cancel) = reg.register(SessionKind::Subscriber, RequestPath::Cat);

        let waiter = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.wait_removed().await })
        };

        // Give the waiter time to park
        tokio::time::sleep(Duration::from_millis(20)).await;
        reg.deregister(id, &cancel);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake after deregistration")
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let reg = Arc::new(registry());
        let mut handles = vec![];

        for _ in 0..100 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                reg.register(SessionKind::Transient, RequestPath::Version).0
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }

        assert_eq!(ids.len(), 100, "all ids unique");
        assert_eq!(reg.count(None), 100);
    }

    #[tokio::test]
    async fn test_concurrent_register_deregister() {
        let reg = Arc::new(registry());
        let mut handles = vec![];

        for _ in 0..50 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let (id, cancel) = reg.register(SessionKind::Subscriber, RequestPath::Cat);
                    tokio::task::yield_now().await;
                    assert!(reg.deregister(id, &cancel));
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(reg.count(None), 0);
    }

    #[tokio::test]
    async fn test_concurrent_evict_all() {
        let reg = Arc::new(registry());

        let mut tokens = vec![];
        for _ in 0..20 {
            let (_, c) = reg.register(SessionKind::Subscriber, RequestPath::Cat);
            tokens.push(c);
        }

        let mut handles = vec![];
        for _ in 0..4 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move { reg.evict_all() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(reg.count(None), 0);
        for token in tokens {
            assert!(token.is_cancelled());
        }
    }
}
