//! Heartbeat monitor.
//!
//! One monitor per listening endpoint sweeps every registered session on a
//! fixed interval:
//!
//! | liveness flag at sweep | action                                       |
//! |------------------------|----------------------------------------------|
//! | `false`                | force-close (`LivenessTimeout`), tear down   |
//! | `true`                 | clear flag, send a ping                      |
//!
//! Only a pong from the connection sets the flag back to `true`. A session
//! that ignores two consecutive probes is closed on the following sweep.
//! Probes are fire-and-forget; the sweep never waits on a connection.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::error::RelayError;
use crate::session::{Outbound, SessionId, SessionManager};

#[derive(Clone)]
pub struct HeartbeatMonitor {
    sessions: SessionManager,
}

impl HeartbeatMonitor {
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }

    /// Run one sweep. Returns the sessions that were forcibly closed.
    pub fn sweep(&self) -> Vec<SessionId> {
        let mut closed = Vec::new();

        for session in self.sessions.registry().iterate() {
            if session.take_alive() {
                session.send(Outbound::Ping);
                continue;
            }

            let id = session.id();
            if self.sessions.terminate(id) {
                let err = RelayError::LivenessTimeout(id);
                warn!(session_id = %id, key = session.key(), error = %err, "forcing close");
                closed.push(id);
            }
        }

        closed
    }
}

/// Spawn the endpoint's heartbeat task. The first sweep runs one full
/// `interval` after start.
pub fn spawn_heartbeat(sessions: SessionManager, interval: Duration) -> JoinHandle<()> {
    let monitor = HeartbeatMonitor::new(sessions);
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            monitor.sweep();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionHandle;
    use blr_db::MemLogStore;
    use std::sync::Arc;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MemLogStore::new()), Duration::from_secs(3600))
    }

    fn drain_pings(rx: &mut crate::session::ConnectionRx) -> usize {
        let mut n = 0;
        while let Ok(frame) = rx.outbound.try_recv() {
            if frame == Outbound::Ping {
                n += 1;
            }
        }
        n
    }

    #[tokio::test]
    async fn first_sweep_probes_and_clears_flag() {
        let mgr = manager();
        let (conn, mut rx) = ConnectionHandle::channel();
        let id = mgr.accept(conn, Some("u1"), None).unwrap();

        let hb = HeartbeatMonitor::new(mgr.clone());
        assert!(hb.sweep().is_empty());
        assert_eq!(drain_pings(&mut rx), 1);
        assert!(!mgr.get(id).unwrap().is_alive());
    }

    #[tokio::test]
    async fn answered_probes_keep_session_open() {
        let mgr = manager();
        let (conn, mut rx) = ConnectionHandle::channel();
        let id = mgr.accept(conn, Some("u1"), None).unwrap();
        let hb = HeartbeatMonitor::new(mgr.clone());

        for _ in 0..5 {
            assert!(hb.sweep().is_empty());
            mgr.mark_alive(id);
        }
        assert_eq!(drain_pings(&mut rx), 5);
        assert_eq!(mgr.open_sessions(), 1);
    }

    #[tokio::test]
    async fn unanswered_probe_closes_on_next_sweep() {
        let mgr = manager();
        let (conn, mut rx) = ConnectionHandle::channel();
        let id = mgr.accept(conn, Some("u1"), None).unwrap();
        let hb = HeartbeatMonitor::new(mgr.clone());

        assert!(hb.sweep().is_empty());
        assert_eq!(hb.sweep(), vec![id]);
        assert_eq!(mgr.open_sessions(), 0);
        assert_eq!(drain_pings(&mut rx), 1, "no probe is sent to a session being closed");

        tokio::time::timeout(Duration::from_millis(100), rx.terminate.notified())
            .await
            .expect("transport must be told to terminate");

        assert!(hb.sweep().is_empty());
    }

    #[tokio::test]
    async fn sweep_only_closes_the_silent_session() {
        let mgr = manager();
        let (quiet_conn, _quiet_rx) = ConnectionHandle::channel();
        let (chatty_conn, _chatty_rx) = ConnectionHandle::channel();
        let quiet = mgr.accept(quiet_conn, Some("u1"), None).unwrap();
        let chatty = mgr.accept(chatty_conn, Some("u2"), None).unwrap();
        let hb = HeartbeatMonitor::new(mgr.clone());

        hb.sweep();
        mgr.mark_alive(chatty);
        assert_eq!(hb.sweep(), vec![quiet]);
        assert!(mgr.get(chatty).is_some());
    }

    #[tokio::test]
    async fn spawned_monitor_closes_silent_session_within_three_sweeps() {
        let mgr = manager();
        let (conn, _rx) = ConnectionHandle::channel();
        mgr.accept(conn, Some("u1"), None).unwrap();

        let task = spawn_heartbeat(mgr.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(20 * 3 + 40)).await;
        task.abort();

        assert_eq!(mgr.open_sessions(), 0);
    }
}
