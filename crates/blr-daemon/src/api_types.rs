//! Request and response types for all blr-daemon endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// /v1/stream  (WebSocket)
// ---------------------------------------------------------------------------

/// Connection-establishment parameters for the stream endpoint.
///
/// `userId` / `lastTimestamp` are accepted for clients written against the
/// older query names. When both spellings are present the current one wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
    /// RFC 3339 timestamp or integer epoch milliseconds.
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default, rename = "lastTimestamp")]
    pub last_timestamp: Option<String>,
}

impl StreamParams {
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().or(self.user_id.as_deref())
    }

    pub fn since(&self) -> Option<&str> {
        self.since.as_deref().or(self.last_timestamp.as_deref())
    }
}

/// One text frame pushed to a stream client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PushMessage {
    Entry {
        payload: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        error: String,
    },
}

impl PushMessage {
    pub fn error(msg: impl Into<String>) -> Self {
        PushMessage::Error { error: msg.into() }
    }
}

/// Response for GET /v1/stream/sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub open_sessions: usize,
}

// ---------------------------------------------------------------------------
// /v1/logs/*
// ---------------------------------------------------------------------------

/// Body for POST /v1/logs/user and POST /v1/logs/bot.
///
/// Fields are optional so a missing field is answered with a 400 carrying
/// an `error` message rather than an extractor rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsertLogRequest {
    #[serde(default, alias = "userId")]
    pub key: Option<String>,
    #[serde(default)]
    pub log: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertLogResponse {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastLogResponse {
    pub last_log: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotFoundResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entry_serialises_with_rfc3339_timestamp() {
        let msg = PushMessage::Entry {
            payload: "hi".to_string(),
            timestamp: Utc.timestamp_opt(100, 0).single().unwrap(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["payload"], "hi");
        assert_eq!(json["timestamp"], "1970-01-01T00:01:40Z");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_serialises_as_bare_error_field() {
        let json = serde_json::to_string(&PushMessage::error("boom")).unwrap();
        assert_eq!(json, r#"{"error":"boom"}"#);
    }

    #[test]
    fn stream_params_accept_legacy_names() {
        let p: StreamParams =
            serde_json::from_str(r#"{"userId":"u1","lastTimestamp":"2024-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(p.key(), Some("u1"));
        assert_eq!(p.since(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn stream_params_prefer_current_names_when_both_are_sent() {
        let p: StreamParams = serde_json::from_str(
            r#"{"key":"u1","userId":"legacy","since":"5","lastTimestamp":"9"}"#,
        )
        .unwrap();
        assert_eq!(p.key(), Some("u1"));
        assert_eq!(p.since(), Some("5"));
    }
}
