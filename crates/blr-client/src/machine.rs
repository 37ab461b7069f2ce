//! Client reconnection state machine.
//!
//! ```text
//!                 connect(key)              handshake ok
//!  Disconnected ───────────────▶ Connecting ────────────▶ Open
//!       ▲                          ▲   │                  │  │
//!       │                 backoff  │   │ dropped          │  │ close requested
//!       │                 elapsed  │   ▼        dropped   │  ▼
//!       │                       Reconnecting ◀────────────┘ Closing
//!       │        close requested   │                         │
//!       ├──────────────────────────┘          transport closed
//!       └────────────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - Only an application-initiated close ends in `Disconnected`. Every other
//!   closure (network drop, server-forced close, handshake failure) goes to
//!   `Reconnecting`, waits the fixed backoff, then dials again with the same
//!   key and no watermark hint.
//! - The backoff is fixed: no jitter, no growth, no cap on attempts.
//! - Events that make no sense in the current state are ignored.
//!
//! Pure deterministic logic. No IO, no clock; the driver performs the
//! returned [`Action`].

use std::time::Duration;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Application asked to (re)connect with this key.
    Connect(String),
    /// WebSocket handshake completed.
    Opened,
    /// Transport went away without being asked to (or the dial failed).
    Dropped,
    /// Application asked to close.
    CloseRequested,
    /// Transport finished closing after a requested close.
    Closed,
    /// The reconnect backoff has elapsed.
    BackoffElapsed,
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a physical connection for this key. If one is still open,
    /// close it first.
    Dial(String),
    /// Sleep this long, then report [`ClientEvent::BackoffElapsed`].
    Wait(Duration),
    /// Close the physical connection cleanly, then report [`ClientEvent::Closed`].
    CloseTransport,
    /// Nothing to do.
    None,
}

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    state: ClientState,
    key: Option<String>,
    backoff: Duration,
    reconnects: u64,
}

impl ReconnectMachine {
    pub fn new(backoff: Duration) -> Self {
        Self {
            state: ClientState::Disconnected,
            key: None,
            backoff,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Number of unclean closures that scheduled a reconnect.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn handle(&mut self, event: ClientEvent) -> Result<Action, ClientError> {
        use ClientEvent as E;
        use ClientState as S;

        let action = match (self.state, event) {
            (_, E::Connect(key)) => {
                if key.trim().is_empty() {
                    return Err(ClientError::MissingKey);
                }
                self.key = Some(key.clone());
                self.state = S::Connecting;
                Action::Dial(key)
            }

            (S::Connecting, E::Opened) => {
                self.state = S::Open;
                Action::None
            }

            (S::Connecting | S::Open, E::Dropped) => {
                self.state = S::Reconnecting;
                self.reconnects += 1;
                Action::Wait(self.backoff)
            }

            (S::Reconnecting, E::BackoffElapsed) => match self.key.clone() {
                Some(key) => {
                    self.state = S::Connecting;
                    Action::Dial(key)
                }
                None => {
                    self.state = S::Disconnected;
                    Action::None
                }
            },

            (S::Connecting | S::Open, E::CloseRequested) => {
                self.state = S::Closing;
                Action::CloseTransport
            }

            (S::Reconnecting, E::CloseRequested) => {
                self.state = S::Disconnected;
                Action::None
            }

            // A requested close counts as clean however the transport ends.
            (S::Closing, E::Closed | E::Dropped) => {
                self.state = S::Disconnected;
                Action::None
            }

            _ => Action::None,
        };

        Ok(action)
    }
}
