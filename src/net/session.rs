//! Session management module
//!
//! Manages client sessions including:
//! - Per-session identity (user id and page scope)
//! - The outbound frame handle of each connection
//! - The thread-safe, insertion-ordered session registry

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{NetworkError, Result, RelayError};

/// Server-internal connection key, unique for the lifetime of the process
pub type SessionKey = u64;

/// Write side of a connection.
///
/// Frames are handed to the connection's writer task through a bounded
/// channel. Delivery never waits: a full or closed channel means the
/// transport is not writable and the frame is dropped.
pub struct Outbound {
    tx: Mutex<Option<mpsc::Sender<String>>>,
}

impl Outbound {
    /// Wrap the sending half of a writer task channel
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Whether the transport currently accepts frames
    pub fn is_open(&self) -> bool {
        self.tx
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Queue a frame if the transport is open, without waiting
    pub fn send_frame(&self, frame: String) -> Result<()> {
        let guard = self.tx.lock();
        let tx = guard
            .as_ref()
            .ok_or(RelayError::Network(NetworkError::TransportUnwritable))?;
        tx.try_send(frame)
            .map_err(|_| RelayError::Network(NetworkError::TransportUnwritable))
    }

    /// Stop accepting frames; the writer task drains and closes the socket
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

#[derive(Debug, Default)]
struct Identity {
    /// Id confirmed by a handshake
    user_id: Option<String>,
    page_id: Option<String>,
}

/// A connected client session
pub struct Session {
    /// Connection key used for identity comparisons
    pub key: SessionKey,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Id generated at accept time, confirmed by a bare handshake
    provisional_id: String,
    identity: RwLock<Identity>,
    outbound: Outbound,
    /// Time of session creation
    pub connected_at: Instant,
}

impl Session {
    /// Create a new session with a freshly generated provisional id
    pub fn new(key: SessionKey, address: SocketAddr, outbound: Outbound) -> Self {
        Self {
            key,
            address,
            provisional_id: Uuid::new_v4().to_string(),
            identity: RwLock::new(Identity::default()),
            outbound,
            connected_at: Instant::now(),
        }
    }

    /// Id generated when the connection was accepted
    pub fn provisional_id(&self) -> &str {
        &self.provisional_id
    }

    /// Handshake-confirmed id, if any
    pub fn user_id(&self) -> Option<String> {
        self.identity.read().user_id.clone()
    }

    /// Confirmed id, falling back to the provisional one
    pub fn current_id(&self) -> String {
        self.user_id()
            .unwrap_or_else(|| self.provisional_id.clone())
    }

    /// Whether a handshake has confirmed this session's id
    pub fn is_confirmed(&self) -> bool {
        self.identity.read().user_id.is_some()
    }

    /// Page scope, if one has been assigned
    pub fn page_id(&self) -> Option<String> {
        self.identity.read().page_id.clone()
    }

    /// Confirm the session id. Returns false if a different id is already confirmed.
    pub fn confirm_id(&self, user_id: String) -> bool {
        let mut identity = self.identity.write();
        match &identity.user_id {
            Some(existing) if *existing != user_id => {
                warn!(
                    session_id = self.key,
                    confirmed = %existing,
                    requested = %user_id,
                    "Ignoring attempt to change a confirmed user id"
                );
                false
            }
            Some(_) => true,
            None => {
                debug!(session_id = self.key, user_id = %user_id, "User id confirmed");
                identity.user_id = Some(user_id);
                true
            }
        }
    }

    /// Assign the page scope. The first assignment wins; returns false if a
    /// different page was already set.
    pub fn adopt_page(&self, page_id: String) -> bool {
        let mut identity = self.identity.write();
        match &identity.page_id {
            Some(existing) if *existing != page_id => {
                debug!(
                    session_id = self.key,
                    page_id = %existing,
                    requested = %page_id,
                    "Page scope already set"
                );
                false
            }
            Some(_) => true,
            None => {
                debug!(session_id = self.key, page_id = %page_id, "Page scope assigned");
                identity.page_id = Some(page_id);
                true
            }
        }
    }

    /// Outbound frame handle
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Whether the session's transport accepts frames
    pub fn is_open(&self) -> bool {
        self.outbound.is_open()
    }

    /// Time since the connection was accepted
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("address", &self.address)
            .field("user_id", &self.user_id())
            .field("page_id", &self.page_id())
            .field("open", &self.is_open())
            .finish()
    }
}

/// Page scope membership counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCounts {
    /// Sessions per assigned page scope
    pub pages: BTreeMap<String, usize>,
    /// Sessions without a page scope
    pub unscoped: usize,
}

/// Thread-safe session registry.
///
/// A single lock serializes membership changes and snapshots, so a broadcast
/// always iterates a consistent view. Iteration order is connection order.
pub struct SessionRegistry {
    sessions: RwLock<Vec<Arc<Session>>>,
    next_key: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            next_key: AtomicU64::new(1),
        }
    }

    /// Allocate a connection key
    pub fn next_key(&self) -> SessionKey {
        self.next_key.fetch_add(1, Ordering::SeqCst)
    }

    /// Create a session around an outbound channel and register it
    pub fn open_session(&self, address: SocketAddr, tx: mpsc::Sender<String>) -> Arc<Session> {
        let session = Arc::new(Session::new(self.next_key(), address, Outbound::new(tx)));
        self.add(session.clone());
        session
    }

    /// Register a session. Adding the same session twice is ignored.
    pub fn add(&self, session: Arc<Session>) {
        let total = {
            let mut sessions = self.sessions.write();
            if sessions.iter().any(|s| s.key == session.key) {
                return;
            }
            sessions.push(session.clone());
            sessions.len()
        };

        info!(
            session_id = session.key,
            address = %session.address,
            total = total,
            "Session registered"
        );
    }

    /// Deregister a session. Unknown sessions are ignored.
    pub fn remove(&self, session: &Session) -> Option<Arc<Session>> {
        let (removed, total) = {
            let mut sessions = self.sessions.write();
            let removed = sessions
                .iter()
                .position(|s| s.key == session.key)
                .map(|index| sessions.remove(index));
            (removed, sessions.len())
        };

        if removed.is_some() {
            info!(
                session_id = session.key,
                user_id = ?session.user_id(),
                total = total,
                "Session removed"
            );
        }
        removed
    }

    /// Independent snapshot of the registered sessions, in connection order
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.read().clone()
    }

    /// Look up a session by connection key
    pub fn get(&self, key: SessionKey) -> Option<Arc<Session>> {
        self.sessions.read().iter().find(|s| s.key == key).cloned()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Count sessions per page scope
    pub fn page_counts(&self) -> PageCounts {
        let mut counts = PageCounts::default();
        for session in self.sessions.read().iter() {
            match session.page_id() {
                Some(page) => *counts.pages.entry(page).or_insert(0) += 1,
                None => counts.unscoped += 1,
            }
        }
        counts
    }

    /// Close every registered transport
    pub fn close_all(&self) {
        for session in self.list() {
            session.outbound().close();
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_address() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    fn channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(8)
    }

    #[test]
    fn test_session_creation() {
        let (tx, _rx) = channel();
        let session = Session::new(1, test_address(), Outbound::new(tx));
        assert_eq!(session.key, 1);
        assert!(!session.is_confirmed());
        assert_eq!(session.page_id(), None);
        assert_eq!(session.current_id(), session.provisional_id());
        assert!(session.is_open());
    }

    #[test]
    fn test_confirmed_id_is_immutable() {
        let (tx, _rx) = channel();
        let session = Session::new(1, test_address(), Outbound::new(tx));

        assert!(session.confirm_id("alice".to_string()));
        assert!(session.confirm_id("alice".to_string()));
        assert!(!session.confirm_id("mallory".to_string()));
        assert_eq!(session.user_id().as_deref(), Some("alice"));
        assert_eq!(session.current_id(), "alice");
    }

    #[test]
    fn test_page_first_write_wins() {
        let (tx, _rx) = channel();
        let session = Session::new(1, test_address(), Outbound::new(tx));

        assert!(session.adopt_page("p1".to_string()));
        assert!(!session.adopt_page("p2".to_string()));
        assert_eq!(session.page_id().as_deref(), Some("p1"));
    }

    #[test]
    fn test_outbound_send_and_close() {
        let (tx, mut rx) = channel();
        let outbound = Outbound::new(tx);

        outbound.send_frame("hello".to_string()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");

        outbound.close();
        assert!(!outbound.is_open());
        assert!(matches!(
            outbound.send_frame("late".to_string()),
            Err(RelayError::Network(NetworkError::TransportUnwritable))
        ));
    }

    #[test]
    fn test_outbound_full_buffer_is_unwritable() {
        let (tx, _rx) = mpsc::channel(1);
        let outbound = Outbound::new(tx);

        outbound.send_frame("first".to_string()).unwrap();
        assert!(outbound.send_frame("second".to_string()).is_err());
        // Still open, just congested
        assert!(outbound.is_open());
    }

    #[test]
    fn test_outbound_dropped_receiver_is_closed() {
        let (tx, rx) = channel();
        let outbound = Outbound::new(tx);
        drop(rx);
        assert!(!outbound.is_open());
    }

    #[test]
    fn test_registry_add_remove() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        let session = registry.open_session(test_address(), tx);

        assert_eq!(registry.len(), 1);
        assert!(registry.get(session.key).is_some());

        // Duplicate add is ignored
        registry.add(session.clone());
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&session).is_some());
        assert!(registry.is_empty());

        // Removing again is a no-op
        assert!(registry.remove(&session).is_none());
    }

    #[test]
    fn test_registry_list_is_ordered_snapshot() {
        let registry = SessionRegistry::new();
        let mut receivers = Vec::new();
        let mut keys = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = channel();
            receivers.push(rx);
            keys.push(registry.open_session(test_address(), tx).key);
        }

        let snapshot = registry.list();
        let (tx, _rx) = channel();
        registry.open_session(test_address(), tx);
        registry.remove(&snapshot[0]);

        let snapshot_keys: Vec<_> = snapshot.iter().map(|s| s.key).collect();
        assert_eq!(snapshot_keys, keys);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_page_counts() {
        let registry = SessionRegistry::new();
        let mut receivers = Vec::new();
        for page in [Some("p1"), Some("p1"), Some("p2"), None] {
            let (tx, rx) = channel();
            receivers.push(rx);
            let session = registry.open_session(test_address(), tx);
            if let Some(page) = page {
                session.adopt_page(page.to_string());
            }
        }

        let counts = registry.page_counts();
        assert_eq!(counts.pages.get("p1"), Some(&2));
        assert_eq!(counts.pages.get("p2"), Some(&1));
        assert_eq!(counts.unscoped, 1);
    }

    #[test]
    fn test_close_all() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        let session = registry.open_session(test_address(), tx);

        registry.close_all();
        assert!(!session.is_open());
    }
}
