//! Connection session manager.
//!
//! # Invariants
//!
//! - A session exists only for a connection that supplied a non-empty key.
//! - Every registered session owns exactly one poll task and exactly one slot
//!   in the [`SessionRegistry`] the heartbeat sweeps. Both are created in
//!   [`SessionManager::accept`] and released together in
//!   [`SessionManager::close`].
//! - `close` is idempotent and synchronous: when it returns, the session is
//!   gone from the registry, its closed flag is set, and its poll task is
//!   aborted. A poll tick already in flight observes the flag and emits
//!   nothing.
//! - Sessions never share mutable state; each watermark is private.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use blr_db::LogStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api_types::PushMessage;
use crate::error::RelayError;
use crate::poller::{self, Watermark};

// ---------------------------------------------------------------------------
// Identifiers and frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Frames queued for a connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Push(PushMessage),
    /// Liveness probe. Carries no payload.
    Ping,
}

// ---------------------------------------------------------------------------
// ConnectionHandle
// ---------------------------------------------------------------------------

/// Transport-facing half of one accepted connection.
///
/// The session pushes frames into `outbound` and fires `terminate` to force
/// the transport down. The transport driver holds the matching
/// [`ConnectionRx`].
#[derive(Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    terminate: Arc<Notify>,
}

/// Receiving half paired with a [`ConnectionHandle`].
pub struct ConnectionRx {
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub terminate: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn channel() -> (Self, ConnectionRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let terminate = Arc::new(Notify::new());
        (
            Self {
                outbound: tx,
                terminate: Arc::clone(&terminate),
            },
            ConnectionRx {
                outbound: rx,
                terminate,
            },
        )
    }

    /// Fire-and-forget. A dropped receiver means the transport is already gone.
    fn send(&self, frame: Outbound) {
        let _ = self.outbound.send(frame);
    }

    fn terminate(&self) {
        // notify_one stores a permit if the driver is not yet waiting.
        self.terminate.notify_one();
    }
}

// ---------------------------------------------------------------------------
// SessionShared
// ---------------------------------------------------------------------------

/// Per-session record shared between the session's own tasks.
pub struct SessionShared {
    id: SessionId,
    key: String,
    pub(crate) watermark: Mutex<Watermark>,
    alive: AtomicBool,
    closed: AtomicBool,
    conn: ConnectionHandle,
}

impl SessionShared {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn watermark(&self) -> Watermark {
        *self.watermark.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn send(&self, frame: Outbound) {
        if !self.is_closed() {
            self.conn.send(frame);
        }
    }

    /// Clear the liveness flag, returning its previous value.
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

struct SessionEntry {
    shared: Arc<SessionShared>,
    poller: JoinHandle<()>,
}

/// Process-scoped registry of open sessions. The heartbeat iterates it; each
/// entry belongs to its session.
#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    fn register(&self, entry: SessionEntry) {
        self.entries.lock().insert(entry.shared.id, entry);
    }

    fn deregister(&self, id: SessionId) -> Option<SessionEntry> {
        self.entries.lock().remove(&id)
    }

    /// Snapshot of every open session. The lock is released before returning.
    pub fn iterate(&self) -> Vec<Arc<SessionShared>> {
        self.entries
            .lock()
            .values()
            .map(|e| Arc::clone(&e.shared))
            .collect()
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SessionShared>> {
        self.entries.lock().get(&id).map(|e| Arc::clone(&e.shared))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Cloneable handle that creates and destroys sessions.
#[derive(Clone)]
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn LogStore>,
    poll_interval: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn LogStore>, poll_interval: Duration) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::default()),
            store,
            poll_interval,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Register a new session for `conn`.
    ///
    /// Fails with [`RelayError::MissingKey`] when `key` is absent or blank;
    /// nothing is registered and no task is started in that case. A missing
    /// or unparseable `since` starts the watermark at epoch zero.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn accept(
        &self,
        conn: ConnectionHandle,
        key: Option<&str>,
        since: Option<&str>,
    ) -> Result<SessionId, RelayError> {
        // Keys are opaque: blank means missing, anything else is kept as sent.
        let key = match key {
            Some(k) if !k.trim().is_empty() => k.to_string(),
            _ => return Err(RelayError::MissingKey),
        };

        let watermark = since.and_then(Watermark::parse).unwrap_or_default();

        let shared = Arc::new(SessionShared {
            id: SessionId::new(),
            key,
            watermark: Mutex::new(watermark),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            conn,
        });

        let poller = tokio::spawn(poller::run_poller(
            Arc::clone(&shared),
            Arc::clone(&self.store),
            self.poll_interval,
        ));

        let id = shared.id;
        info!(session_id = %id, key = %shared.key, since = %watermark.get(), "session accepted");
        self.registry.register(SessionEntry { shared, poller });
        Ok(id)
    }

    /// Tear down a session. Idempotent; returns whether anything was closed.
    pub fn close(&self, id: SessionId) -> bool {
        self.release(id).is_some()
    }

    /// Close a session and force its transport down.
    pub fn terminate(&self, id: SessionId) -> bool {
        match self.release(id) {
            Some(shared) => {
                shared.conn.terminate();
                true
            }
            None => false,
        }
    }

    fn release(&self, id: SessionId) -> Option<Arc<SessionShared>> {
        let entry = self.registry.deregister(id)?;
        entry.shared.closed.store(true, Ordering::SeqCst);
        entry.poller.abort();
        info!(session_id = %id, key = %entry.shared.key, "session closed");
        Some(entry.shared)
    }

    /// Record a probe acknowledgment for `id`.
    pub fn mark_alive(&self, id: SessionId) {
        if let Some(shared) = self.registry.get(id) {
            debug!(session_id = %id, "pong");
            shared.mark_alive();
        }
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SessionShared>> {
        self.registry.get(id)
    }

    pub fn open_sessions(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blr_db::{LogTable, MemLogStore};
    use chrono::{TimeZone, Utc};

    fn manager(store: Arc<MemLogStore>) -> SessionManager {
        SessionManager::new(store, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn missing_or_blank_key_registers_nothing() {
        let store = Arc::new(MemLogStore::new());
        let mgr = manager(Arc::clone(&store));

        for key in [None, Some(""), Some("   ")] {
            let (conn, _rx) = ConnectionHandle::channel();
            assert_eq!(mgr.accept(conn, key, None), Err(RelayError::MissingKey));
        }
        assert_eq!(mgr.open_sessions(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.query_count(), 0, "no poller may run for a rejected connection");
    }

    #[tokio::test]
    async fn key_is_polled_exactly_as_sent() {
        let store = Arc::new(MemLogStore::new());
        let t100 = Utc.timestamp_opt(100, 0).single().unwrap();
        store.insert(LogTable::Bot, " u1 ", "hi", t100).await.unwrap();
        store.insert(LogTable::Bot, "u1", "other key", t100).await.unwrap();

        let mgr = manager(Arc::clone(&store));
        let (conn, mut rx) = ConnectionHandle::channel();
        let id = mgr.accept(conn, Some(" u1 "), None).unwrap();
        assert_eq!(mgr.get(id).unwrap().key(), " u1 ");

        let first = tokio::time::timeout(Duration::from_millis(200), rx.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            first,
            Outbound::Push(PushMessage::Entry {
                payload: "hi".to_string(),
                timestamp: t100
            })
        );
    }

    #[tokio::test]
    async fn since_hint_seeds_watermark() {
        let mgr = manager(Arc::new(MemLogStore::new()));

        let (conn, _rx) = ConnectionHandle::channel();
        let id = mgr.accept(conn, Some("u1"), Some("1970-01-01T00:01:40Z")).unwrap();
        let seeded = mgr.get(id).unwrap().watermark();
        assert_eq!(seeded.get(), Utc.timestamp_opt(100, 0).single().unwrap());

        let (conn, _rx) = ConnectionHandle::channel();
        let id = mgr.accept(conn, Some("u1"), Some("not a time")).unwrap();
        assert_eq!(mgr.get(id).unwrap().watermark(), Watermark::zero());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_polling() {
        let store = Arc::new(MemLogStore::new());
        let mgr = manager(Arc::clone(&store));

        let (conn, mut rx) = ConnectionHandle::channel();
        let id = mgr.accept(conn, Some("u1"), None).unwrap();
        let shared = mgr.get(id).unwrap();
        assert_eq!(mgr.open_sessions(), 1);

        assert!(mgr.close(id));
        assert!(!mgr.close(id));
        assert!(shared.is_closed());
        assert_eq!(mgr.open_sessions(), 0);

        // Anything written after close must never reach the connection.
        let queries_at_close = store.query_count();
        store
            .insert(LogTable::Bot, "u1", "late", Utc::now())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.query_count() <= queries_at_close + 1);
        while let Ok(frame) = rx.outbound.try_recv() {
            assert!(
                !matches!(frame, Outbound::Push(PushMessage::Entry { .. })),
                "closed session emitted {frame:?}"
            );
        }
    }

    #[tokio::test]
    async fn terminate_fires_transport_signal() {
        let mgr = manager(Arc::new(MemLogStore::new()));
        let (conn, rx) = ConnectionHandle::channel();
        let id = mgr.accept(conn, Some("u1"), None).unwrap();

        assert!(mgr.terminate(id));
        assert!(!mgr.terminate(id));

        tokio::time::timeout(Duration::from_millis(100), rx.terminate.notified())
            .await
            .expect("terminate signal must be delivered");
    }

    #[tokio::test]
    async fn sessions_on_same_key_keep_independent_watermarks() {
        let store = Arc::new(MemLogStore::new());
        let t100 = Utc.timestamp_opt(100, 0).single().unwrap();
        store.insert(LogTable::Bot, "u1", "hi", t100).await.unwrap();

        let mgr = manager(Arc::clone(&store));
        let (fresh_conn, mut fresh_rx) = ConnectionHandle::channel();
        let (late_conn, mut late_rx) = ConnectionHandle::channel();
        let fresh = mgr.accept(fresh_conn, Some("u1"), None).unwrap();
        let late = mgr
            .accept(late_conn, Some("u1"), Some("1970-01-01T00:01:40Z"))
            .unwrap();

        let first = tokio::time::timeout(Duration::from_millis(200), fresh_rx.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            first,
            Outbound::Push(PushMessage::Entry {
                payload: "hi".to_string(),
                timestamp: t100
            })
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(late_rx.outbound.try_recv().is_err(), "already-seen entry must not be emitted");

        assert_eq!(mgr.get(fresh).unwrap().watermark().get(), t100);
        assert_eq!(mgr.get(late).unwrap().watermark().get(), t100);
    }
}
