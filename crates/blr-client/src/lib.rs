//! blr-client
//!
//! Consumer side of the bot-log stream.
//!
//! - [`machine`]: the reconnection state machine, pure and clock-free.
//! - [`frame`]: decoding of server push frames.
//! - [`client`]: the tokio-tungstenite driver that keeps one logical feed
//!   alive across physical reconnects.

pub mod client;
pub mod error;
pub mod frame;
pub mod machine;

pub use client::{ClientConfig, FeedClient, DEFAULT_BACKOFF};
pub use error::ClientError;
pub use frame::{decode_frame, FeedEvent};
pub use machine::{Action, ClientEvent, ClientState, ReconnectMachine};
