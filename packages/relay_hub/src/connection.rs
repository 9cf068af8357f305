use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::EnqueueError;

/// Serialized outbound payload, shared by every recipient of one delivery.
pub type Payload = Arc<str>;

/// Unique identifier for a live connection
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ConnectionId(pub Uuid);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

struct Shared {
    id: ConnectionId,
    user_id: String,
    initial_group: Option<String>,
    state: AtomicU8,
    /// Taken (and dropped) exactly once when the queue is closed.
    outbound: Mutex<Option<mpsc::Sender<Payload>>>,
}

/// Cheap, cloneable handle to a connection's identity and outbound queue.
///
/// Equality and hashing use the connection id only.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Shared>,
}

/// Receiving half of a connection's outbound queue, drained by the writer loop.
pub struct Outbox {
    rx: mpsc::Receiver<Payload>,
}

impl Outbox {
    /// Wait for the next payload. `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }

    /// Take a payload only if one is already queued.
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.rx.try_recv().ok()
    }

    /// Number of payloads currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl ConnectionHandle {
    /// Create a connection in the `Connecting` state with a bounded queue.
    pub fn new(
        user_id: impl Into<String>,
        initial_group: Option<String>,
        capacity: usize,
    ) -> (Self, Outbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            inner: Arc::new(Shared {
                id: ConnectionId(Uuid::new_v4()),
                user_id: user_id.into(),
                initial_group: initial_group.filter(|g| !g.is_empty()),
                state: AtomicU8::new(ConnectionState::Connecting as u8),
                outbound: Mutex::new(Some(tx)),
            }),
        };
        (handle, Outbox { rx })
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn initial_group(&self) -> Option<&str> {
        self.inner.initial_group.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Move from `from` to `to`. Returns false if the connection was not in `from`.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Connecting -> Open`, done once at registration.
    pub(crate) fn mark_open(&self) -> bool {
        self.transition(ConnectionState::Connecting, ConnectionState::Open)
    }

    /// Enter `Closing` from `Connecting` or `Open`. Returns true only for the
    /// call that performed the transition.
    pub(crate) fn begin_closing(&self) -> bool {
        self.transition(ConnectionState::Open, ConnectionState::Closing)
            || self.transition(ConnectionState::Connecting, ConnectionState::Closing)
    }

    /// Terminal state, set once both loops have exited and the transport is closed.
    pub fn mark_closed(&self) {
        self.begin_closing();
        self.inner
            .state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.close_outbound();
    }

    /// Push a payload without waiting.
    pub fn try_enqueue(&self, payload: Payload) -> Result<(), EnqueueError> {
        let guard = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.try_send(payload).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            }),
            None => Err(EnqueueError::Closed),
        }
    }

    /// Close the outbound queue so the writer drains what is left and exits.
    /// Returns true only for the call that actually closed it.
    pub(crate) fn close_outbound(&self) -> bool {
        let mut guard = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.take().is_some()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user_id)
            .field("initial_group", &self.inner.initial_group)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_forward_only() {
        let (conn, _outbox) = ConnectionHandle::new("alice", None, 4);
        assert_eq!(conn.state(), ConnectionState::Connecting);

        assert!(conn.mark_open());
        assert!(!conn.mark_open());
        assert!(conn.is_open());

        assert!(conn.begin_closing());
        assert!(!conn.begin_closing());
        assert_eq!(conn.state(), ConnectionState::Closing);

        conn.mark_closed();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.begin_closing());
        assert!(!conn.mark_open());
        conn.mark_closed();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn empty_initial_group_is_none() {
        let (conn, _outbox) = ConnectionHandle::new("alice", Some(String::new()), 4);
        assert!(conn.initial_group().is_none());
        let (conn, _outbox) = ConnectionHandle::new("alice", Some("g1".into()), 4);
        assert_eq!(conn.initial_group(), Some("g1"));
    }

    #[tokio::test]
    async fn queue_is_fifo_and_bounded() {
        let (conn, mut outbox) = ConnectionHandle::new("alice", None, 2);
        conn.try_enqueue(Arc::from("one")).unwrap();
        conn.try_enqueue(Arc::from("two")).unwrap();
        assert_eq!(conn.try_enqueue(Arc::from("three")), Err(EnqueueError::Full));
        assert_eq!(outbox.len(), 2);

        assert_eq!(outbox.recv().await.as_deref(), Some("one"));
        assert_eq!(outbox.recv().await.as_deref(), Some("two"));
        assert!(outbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn close_outbound_drains_then_ends() {
        let (conn, mut outbox) = ConnectionHandle::new("alice", None, 4);
        conn.try_enqueue(Arc::from("last")).unwrap();

        assert!(conn.close_outbound());
        assert!(!conn.close_outbound());
        assert_eq!(conn.try_enqueue(Arc::from("late")), Err(EnqueueError::Closed));

        assert_eq!(outbox.recv().await.as_deref(), Some("last"));
        assert!(outbox.recv().await.is_none());
    }

    #[test]
    fn equality_by_id() {
        let (a, _ra) = ConnectionHandle::new("alice", None, 1);
        let (b, _rb) = ConnectionHandle::new("alice", None, 1);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
