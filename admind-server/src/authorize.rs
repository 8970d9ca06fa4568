//! Caller authorization
//!
//! Every request is checked against a [`Gate`] before any session state is
//! created. The production gate reads the peer's Unix credentials
//! (SO_PEERCRED) off the socket; tests substitute policy gates to exercise
//! denial paths.

use tokio::net::UnixStream;
use tracing::debug;

use admind_protocol::RequestPath;
use admind_utils::Result;

/// Identity of the connecting process, from SO_PEERCRED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub uid: u32,
    pub gid: u32,
    pub pid: Option<i32>,
}

impl CallerIdentity {
    /// Read the peer credentials off a connected Unix socket
    pub fn from_stream(stream: &UnixStream) -> Result<Self> {
        let cred = stream.peer_cred()?;
        Ok(Self {
            uid: cred.uid(),
            gid: cred.gid(),
            pid: cred.pid(),
        })
    }
}

impl std::fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "uid={} gid={} pid={}", self.uid, self.gid, pid),
            None => write!(f, "uid={} gid={}", self.uid, self.gid),
        }
    }
}

/// Authorization decision point
///
/// Called once per request, before a session is registered. Returning
/// false refuses the request; the caller learns only that it was denied.
pub trait Gate: Send + Sync + 'static {
    fn authorize(&self, caller: &CallerIdentity, action: &RequestPath) -> bool;
}

/// Gate allowing root and the daemon's own user
///
/// Administrative actions on a privileged daemon belong to root; the
/// daemon's own uid is admitted so an unprivileged development instance
/// remains controllable by whoever started it.
pub struct PeerCredGate {
    daemon_uid: u32,
}

impl Default for PeerCredGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerCredGate {
    pub fn new() -> Self {
        // SAFETY: getuid() is always safe to call
        let daemon_uid = unsafe { libc::getuid() };
        Self { daemon_uid }
    }
}

impl Gate for PeerCredGate {
    fn authorize(&self, caller: &CallerIdentity, action: &RequestPath) -> bool {
        let allowed = caller.uid == 0 || caller.uid == self.daemon_uid;
        if !allowed {
            debug!("Denied {} for {}", action, caller);
        }
        allowed
    }
}

/// Gate built from a closure, for tests and embedding
pub struct PolicyGate<F>(F);

impl<F> PolicyGate<F>
where
    F: Fn(&CallerIdentity, &RequestPath) -> bool + Send + Sync + 'static,
{
    pub fn new(policy: F) -> Self {
        Self(policy)
    }
}

impl<F> Gate for PolicyGate<F>
where
    F: Fn(&CallerIdentity, &RequestPath) -> bool + Send + Sync + 'static,
{
    fn authorize(&self, caller: &CallerIdentity, action: &RequestPath) -> bool {
        (self.0)(caller, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(uid: u32) -> CallerIdentity {
        CallerIdentity {
            uid,
            gid: uid,
            pid: Some(1234),
        }
    }

    #[test]
    fn test_peer_cred_gate_allows_root() {
        let gate = PeerCredGate { daemon_uid: 1000 };
        assert!(gate.authorize(&caller(0), &RequestPath::Stop { force: true }));
    }

    #[test]
    fn test_peer_cred_gate_allows_daemon_uid() {
        let gate = PeerCredGate { daemon_uid: 1000 };
        assert!(gate.authorize(&caller(1000), &RequestPath::Version));
    }

    #[test]
    fn test_peer_cred_gate_denies_other_uids() {
        let gate = PeerCredGate { daemon_uid: 1000 };
        assert!(!gate.authorize(&caller(1001), &RequestPath::Cat));
        assert!(!gate.authorize(&caller(65534), &RequestPath::Status));
    }

    #[test]
    fn test_policy_gate_sees_the_action() {
        let gate = PolicyGate::new(|_caller, action: &RequestPath| {
            !matches!(action, RequestPath::Stop { .. })
        });

        assert!(gate.authorize(&caller(0), &RequestPath::Version));
        assert!(!gate.authorize(&caller(0), &RequestPath::Stop { force: false }));
    }

    #[test]
    fn test_caller_identity_display() {
        assert_eq!(caller(42).to_string(), "uid=42 gid=42 pid=1234");

        let anon = CallerIdentity {
            uid: 7,
            gid: 8,
            pid: None,
        };
        assert_eq!(anon.to_string(), "uid=7 gid=8");
    }
}
