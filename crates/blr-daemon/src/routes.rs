//! Axum router and all HTTP handlers for blr-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  Tests compose the bare router directly.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use blr_db::LogTable;
use chrono::Utc;
use tracing::{error, info};

use crate::{
    api_types::{
        ErrorResponse, HealthResponse, InsertLogRequest, InsertLogResponse, LastLogResponse,
        NotFoundResponse, SessionsResponse, StreamParams,
    },
    relay,
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/stream/sessions", get(stream_sessions))
        .route("/v1/logs/user", post(insert_user_log))
        .route("/v1/logs/bot", post(insert_bot_log))
        .route("/v1/logs/user/:key", get(last_user_log))
        .route("/v1/logs/bot/:key", get(last_bot_log))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (WebSocket)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(
    State(st): State<Arc<AppState>>,
    params: Result<Query<StreamParams>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> Response {
    match params {
        Ok(Query(params)) => {
            let sessions = st.sessions.clone();
            ws.on_upgrade(move |socket| relay::serve_connection(socket, sessions, params))
        }
        // Bad query strings get the same error-then-close answer as a
        // missing key instead of a bare HTTP 400.
        Err(rejection) => {
            let reason = format!("invalid stream parameters: {}", rejection.body_text());
            ws.on_upgrade(move |socket| relay::reject_connection(socket, reason))
        }
    }
}

pub(crate) async fn stream_sessions(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(SessionsResponse {
        open_sessions: st.sessions.open_sessions(),
    })
}

// ---------------------------------------------------------------------------
// POST /v1/logs/{user,bot}
// ---------------------------------------------------------------------------

pub(crate) async fn insert_user_log(
    State(st): State<Arc<AppState>>,
    Json(req): Json<InsertLogRequest>,
) -> Response {
    insert_log(&st, LogTable::User, req).await
}

pub(crate) async fn insert_bot_log(
    State(st): State<Arc<AppState>>,
    Json(req): Json<InsertLogRequest>,
) -> Response {
    insert_log(&st, LogTable::Bot, req).await
}

async fn insert_log(st: &AppState, table: LogTable, req: InsertLogRequest) -> Response {
    let (key, log) = match (non_blank(req.key), non_blank(req.log)) {
        (Some(k), Some(l)) => (k, l),
        _ => {
            return bad_request("fields 'key' and 'log' are required");
        }
    };

    let timestamp = Utc::now();
    if let Err(err) = st.store.insert(table, &key, &log, timestamp).await {
        error!(%table, key = %key, error = %err, "insert log failed");
        return internal_error(format!("failed to save log to {table}"));
    }

    info!(%table, key = %key, ts = %timestamp, "log inserted");
    (
        StatusCode::OK,
        Json(InsertLogResponse {
            message: format!("log inserted into {table}"),
            timestamp,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/logs/{user,bot}/:key
// ---------------------------------------------------------------------------

pub(crate) async fn last_user_log(
    State(st): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Response {
    last_log(&st, LogTable::User, key).await
}

pub(crate) async fn last_bot_log(
    State(st): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Response {
    last_log(&st, LogTable::Bot, key).await
}

async fn last_log(st: &AppState, table: LogTable, key: String) -> Response {
    let Some(key) = non_blank(Some(key)) else {
        return bad_request("path parameter 'key' is required");
    };

    match st.store.most_recent(table, &key).await {
        Ok(Some(entry)) => (
            StatusCode::OK,
            Json(LastLogResponse {
                last_log: entry.payload,
            }),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(NotFoundResponse {
                message: format!("no log found for key '{key}'"),
            }),
        )
            .into_response(),
        Err(err) => {
            error!(%table, key = %key, error = %err, "fetch last log failed");
            internal_error(format!("failed to fetch log from {table}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn non_blank(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn bad_request(msg: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

fn internal_error(msg: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: msg }),
    )
        .into_response()
}
