//! Shared helpers: a real relay on a loopback socket backed by MemLogStore.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use blr_daemon::{config::RelayConfig, heartbeat, routes, state::AppState};
use blr_db::{LogStore, LogTable, MemLogStore};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub type ClientSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct Relay {
    pub state: Arc<AppState>,
    pub store: Arc<MemLogStore>,
    pub addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl Relay {
    /// Serve the router on 127.0.0.1:0. The heartbeat only runs when an
    /// interval is given.
    pub async fn start(poll_interval: Duration, heartbeat_interval: Option<Duration>) -> Relay {
        let store = Arc::new(MemLogStore::new());
        let config = RelayConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: None,
            poll_interval,
            heartbeat_interval: heartbeat_interval.unwrap_or(Duration::from_secs(3600)),
        };
        let state = Arc::new(AppState::new(
            Arc::clone(&store) as Arc<dyn LogStore>,
            &config,
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = routes::build_router(Arc::clone(&state));

        let mut tasks = vec![tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        })];
        if let Some(interval) = heartbeat_interval {
            tasks.push(heartbeat::spawn_heartbeat(state.sessions.clone(), interval));
        }

        Relay {
            state,
            store,
            addr,
            tasks,
        }
    }

    pub fn stream_url(&self) -> String {
        format!("ws://{}/v1/stream", self.addr)
    }

    pub async fn connect_raw(&self, query: &str) -> ClientSocket {
        let url = format!("{}?{query}", self.stream_url());
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        socket
    }

    pub async fn insert_bot(&self, key: &str, payload: &str, at: DateTime<Utc>) {
        self.store
            .insert(LogTable::Bot, key, payload, at)
            .await
            .unwrap();
    }

    pub fn open_sessions(&self) -> usize {
        self.state.sessions.open_sessions()
    }

    /// Poll until `open_sessions() == n` or the deadline passes.
    pub async fn wait_for_sessions(&self, n: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.open_sessions() == n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.open_sessions() == n
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        for t in &self.tasks {
            t.abort();
        }
    }
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

/// Next text frame as JSON, skipping control frames. `None` on timeout,
/// close, or end of stream.
pub async fn next_json(socket: &mut ClientSocket, within: Duration) -> Option<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let msg = tokio::time::timeout_at(deadline, socket.next()).await.ok()??;
        match msg {
            Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Ok(Message::Binary(_)) | Ok(Message::Close(_)) | Err(_) => return None,
        }
    }
}
