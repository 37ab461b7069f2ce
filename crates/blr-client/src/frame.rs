//! Server push frame decoding.
//!
//! Accepted shapes:
//! - `{"payload": "...", "timestamp": "<RFC 3339>"}` (timestamp optional)
//! - `{"error": "..."}`
//!
//! `lastLog` and `botMessage` are accepted as older names for `payload`,
//! `botTimeStamp` for `timestamp`. Anything else is malformed.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ClientError;

/// What the application receives from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A new log entry. `timestamp` is the server's observation time and is
    /// for display only.
    Entry {
        payload: String,
        timestamp: Option<DateTime<Utc>>,
    },
    /// A recoverable server-side fault reported inline.
    ServerError(String),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(alias = "lastLog", alias = "botMessage")]
    payload: Option<String>,
    #[serde(alias = "botTimeStamp")]
    timestamp: Option<DateTime<Utc>>,
    error: Option<String>,
}

pub fn decode_frame(text: &str) -> Result<FeedEvent, ClientError> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| ClientError::MalformedMessage(e.to_string()))?;

    match raw {
        RawFrame {
            error: Some(error), ..
        } => Ok(FeedEvent::ServerError(error)),
        RawFrame {
            payload: Some(payload),
            timestamp,
            ..
        } => Ok(FeedEvent::Entry { payload, timestamp }),
        _ => Err(ClientError::MalformedMessage(
            "frame carries neither payload nor error".to_string(),
        )),
    }
}
