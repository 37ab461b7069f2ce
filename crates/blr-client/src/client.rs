//! Feed client: keeps one logical feed alive across physical reconnects.
//!
//! [`FeedClient::connect`] spawns a driver task that performs the
//! [`Action`]s returned by a [`ReconnectMachine`]. Entries are delivered on
//! the returned channel in arrival order. Only one driver (and therefore one
//! physical connection) exists per client; connecting again first closes
//! the previous one.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ClientError;
use crate::frame::{decode_frame, FeedEvent};
use crate::machine::{Action, ClientEvent, ClientState, ReconnectMachine};

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

/// How long a requested close waits for the server's close reply.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Stream endpoint, e.g. `ws://127.0.0.1:5148/v1/stream`.
    pub url: String,
    /// Fixed wait between an unclean closure and the next dial.
    pub backoff: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Build the dial URL for `key`. No `since` hint is ever sent: each new
/// session starts its own watermark.
pub fn stream_url(base: &str, key: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(base).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme '{other}'"
            )))
        }
    }
    url.query_pairs_mut().append_pair("key", key);
    Ok(url)
}

// ---------------------------------------------------------------------------
// FeedClient
// ---------------------------------------------------------------------------

struct Running {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct FeedClient {
    config: ClientConfig,
    state: watch::Receiver<ClientState>,
    running: Option<Running>,
}

impl FeedClient {
    pub fn new(config: ClientConfig) -> Self {
        let (_tx, state) = watch::channel(ClientState::Disconnected);
        Self {
            config,
            state,
            running: None,
        }
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Watch state transitions of the current logical connection.
    pub fn state_changes(&self) -> watch::Receiver<ClientState> {
        self.state.clone()
    }

    /// Open the feed for `key`, closing any existing connection first.
    pub async fn connect(
        &mut self,
        key: &str,
    ) -> Result<mpsc::UnboundedReceiver<FeedEvent>, ClientError> {
        let mut machine = ReconnectMachine::new(self.config.backoff);
        let first = machine.handle(ClientEvent::Connect(key.to_string()))?;
        let url = stream_url(&self.config.url, key)?;

        self.close().await;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(machine.state());
        let (stop_tx, stop_rx) = watch::channel(false);

        let driver = Driver {
            url,
            machine,
            events: events_tx,
            state: state_tx,
            stop: stop_rx,
        };

        self.state = state_rx;
        self.running = Some(Running {
            stop: stop_tx,
            task: tokio::spawn(driver.run(first)),
        });

        Ok(events_rx)
    }

    /// Close the feed cleanly. No reconnect follows. Idempotent.
    pub async fn close(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop.send(true);
            if let Err(err) = running.task.await {
                warn!(error = %err, "feed driver ended abnormally");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

enum OpenExit {
    Requested,
    Dropped(String),
}

struct Driver {
    url: Url,
    machine: ReconnectMachine,
    events: mpsc::UnboundedSender<FeedEvent>,
    state: watch::Sender<ClientState>,
    stop: watch::Receiver<bool>,
}

impl Driver {
    async fn run(mut self, mut action: Action) {
        loop {
            action = match action {
                Action::Dial(key) => {
                    debug!(key = %key, url = %self.url, "dialing");
                    self.dial().await
                }
                Action::Wait(backoff) => {
                    info!(
                        backoff_ms = backoff.as_millis() as u64,
                        attempt = self.machine.reconnects(),
                        "reconnecting"
                    );
                    let event = tokio::select! {
                        _ = tokio::time::sleep(backoff) => ClientEvent::BackoffElapsed,
                        _ = wait_stop(&mut self.stop) => ClientEvent::CloseRequested,
                    };
                    self.step(event)
                }
                // Close requested while no transport is held.
                Action::CloseTransport => self.step(ClientEvent::Closed),
                Action::None => break,
            };
        }
        debug!(state = ?self.machine.state(), "feed driver stopped");
    }

    fn step(&mut self, event: ClientEvent) -> Action {
        let action = match self.machine.handle(event) {
            Ok(action) => action,
            Err(err) => {
                warn!(error = %err, "rejected client event");
                Action::None
            }
        };
        self.state.send_replace(self.machine.state());
        action
    }

    async fn dial(&mut self) -> Action {
        let connected = tokio::select! {
            res = connect_async(self.url.as_str()) => Some(res),
            _ = wait_stop(&mut self.stop) => None,
        };

        match connected {
            None => self.step(ClientEvent::CloseRequested),
            Some(Err(err)) => {
                let err = ClientError::UncleanDisconnect(err.to_string());
                warn!(error = %err, "connect failed");
                self.step(ClientEvent::Dropped)
            }
            Some(Ok((socket, _response))) => {
                self.step(ClientEvent::Opened);
                info!(url = %self.url, "feed open");
                match self.run_open(socket).await {
                    OpenExit::Requested => match self.step(ClientEvent::CloseRequested) {
                        // run_open already performed the close handshake.
                        Action::CloseTransport => self.step(ClientEvent::Closed),
                        other => other,
                    },
                    OpenExit::Dropped(reason) => {
                        let err = ClientError::UncleanDisconnect(reason);
                        warn!(error = %err, "feed dropped");
                        self.step(ClientEvent::Dropped)
                    }
                }
            }
        }
    }

    async fn run_open(&mut self, socket: Socket) -> OpenExit {
        let (mut sink, mut stream) = socket.split();

        loop {
            let next = tokio::select! {
                msg = stream.next() => Some(msg),
                _ = wait_stop(&mut self.stop) => None,
            };

            let Some(msg) = next else {
                let _ = sink.send(Message::Close(None)).await;
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
                    while let Some(Ok(_)) = stream.next().await {}
                })
                .await;
                return OpenExit::Requested;
            };

            match msg {
                Some(Ok(Message::Text(text))) => self.deliver(&text),
                Some(Ok(Message::Binary(_))) => {
                    let err = ClientError::MalformedMessage("binary frame".to_string());
                    warn!(error = %err, "dropping frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    return OpenExit::Dropped(format!("server closed the connection: {frame:?}"));
                }
                // Pings are answered by tungstenite on the next read.
                Some(Ok(_)) => {}
                Some(Err(err)) => return OpenExit::Dropped(err.to_string()),
                None => return OpenExit::Dropped("stream ended".to_string()),
            }
        }
    }

    fn deliver(&self, text: &str) {
        match decode_frame(text) {
            Ok(event) => {
                if let FeedEvent::ServerError(msg) = &event {
                    warn!(error = %msg, "server reported an error");
                }
                if self.events.send(event).is_err() {
                    debug!("feed receiver dropped; discarding event");
                }
            }
            Err(err) => warn!(error = %err, "dropping frame"),
        }
    }
}

/// Resolves once a stop is requested or the owning client is dropped.
async fn wait_stop(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|requested| *requested).await;
}
