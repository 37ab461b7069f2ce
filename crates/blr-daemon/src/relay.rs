//! WebSocket transport for the stream endpoint.
//!
//! Each upgraded socket is split in two halves driven concurrently:
//! - the writer drains the session's outbound queue (pushes and pings);
//! - the reader records pongs and watches for the client going away.
//!
//! Whichever ends first (or a terminate signal from the heartbeat) ends the
//! connection, after which the session is closed. A connection without a key
//! (or with an undecodable query string) gets one error frame and a close
//! frame, and never becomes a session.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::api_types::{PushMessage, StreamParams};
use crate::session::{ConnectionHandle, ConnectionRx, Outbound, SessionId, SessionManager};

pub async fn serve_connection(socket: WebSocket, sessions: SessionManager, params: StreamParams) {
    let (mut sink, mut stream) = socket.split();
    let (conn, rx) = ConnectionHandle::channel();

    let id = match sessions.accept(conn, params.key(), params.since()) {
        Ok(id) => id,
        Err(err) => {
            warn!(error = %err, "rejecting stream connection");
            send_error_and_close(&mut sink, err.to_string()).await;
            return;
        }
    };

    let ConnectionRx {
        mut outbound,
        terminate,
    } = rx;

    let writer = async {
        while let Some(frame) = outbound.recv().await {
            let msg = match frame {
                Outbound::Push(push) => match encode(&push) {
                    Some(text) => Message::Text(text),
                    None => continue,
                },
                Outbound::Ping => Message::Ping(Vec::new()),
            };
            if let Err(err) = sink.send(msg).await {
                debug!(session_id = %id, error = %err, "send failed");
                break;
            }
        }
    };

    let reader = read_until_gone(&mut stream, &sessions, id);

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
        _ = terminate.notified() => {
            info!(session_id = %id, "terminating connection");
        }
    }

    sessions.close(id);
}

/// Answer a connection whose query string could not be decoded: one error
/// frame, then close. No session is created.
pub async fn reject_connection(socket: WebSocket, reason: String) {
    warn!(error = %reason, "rejecting stream connection");
    let (mut sink, _stream) = socket.split();
    send_error_and_close(&mut sink, reason).await;
}

async fn send_error_and_close<S>(sink: &mut S, reason: String)
where
    S: futures_util::Sink<Message> + Unpin,
{
    if let Some(text) = encode(&PushMessage::error(reason)) {
        let _ = sink.send(Message::Text(text)).await;
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn read_until_gone<S>(stream: &mut S, sessions: &SessionManager, id: SessionId)
where
    S: futures_util::Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Pong(_)) => sessions.mark_alive(id),
            // Keep reading so the close reply is flushed; the stream ends next.
            Ok(Message::Close(frame)) => {
                debug!(session_id = %id, ?frame, "client closed");
            }
            Ok(_) => {}
            Err(err) => {
                debug!(session_id = %id, error = %err, "read failed");
                break;
            }
        }
    }
}

fn encode(msg: &PushMessage) -> Option<String> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(text),
        Err(err) => {
            warn!(error = %err, "failed to encode push message");
            None
        }
    }
}
