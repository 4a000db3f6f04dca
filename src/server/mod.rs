//! # Droplink Share Server
//!
//! The HTTP surface over the coordinator. Two browser peers talk to these
//! endpoints to set up a direct transfer; the file itself never passes
//! through here.
//!
//! ```text
//! ┌─────────────────┐       ┌─────────────────┐       ┌─────────────────┐
//! │  Publisher      │       │  Share Server   │       │  Subscriber     │
//! │  (Browser)      │◄─────►│                 │◄─────►│  (Browser)      │
//! │                 │       │  - Share Codes  │       │                 │
//! │  POST /share    │       │  - Signaling    │       │  POST subscribe │
//! │  signal + poll  │       │  - Expiry       │       │  signal + poll  │
//! └─────────────────┘       └─────────────────┘       └─────────────────┘
//!          │                                                   ▲
//!          └────────────── WebRTC data channel ────────────────┘
//!                         (file bytes, direct)
//! ```
//!
//! ## API Endpoints
//!
//! - `POST /share` - register a file, get a share code
//! - `GET /share/{code}` - metadata and status (pure read)
//! - `POST /share/{code}/subscribe` - redeem a code, pairing the session
//! - `POST /share/{code}/signal` - queue a negotiation message for the peer
//! - `GET /share/{code}/signal?role=&since=` - long-poll the caller's inbox
//! - `POST /share/{code}/complete` - report the transfer delivered
//! - `DELETE /share/{code}` - abandon the share
//! - `GET /shares` - diagnostics listing of live sessions
//!
//! Errors come back as `{"error": "..."}` bodies. A missing code and an
//! expired one both read as "invalid or expired share code"; only the status
//! code (404 vs 410) tells them apart.
//!
//! ## Example Usage
//!
//! ```bash
//! # Start the server on all interfaces
//! droplink --host 0.0.0.0 --port 8390
//!
//! # Shorter share lifetime, snappier sweeps
//! droplink --ttl-secs 600 --sweep-secs 10
//! ```

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::coordinator::ShareCoordinator;
use crate::session::{self, Role, SessionStatus, SessionStore, ShareError, ShareMeta};
use crate::signal::{SignalBatch, SignalKind};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Droplink server - hands out share codes and relays WebRTC signaling"
)]
pub struct Args {
    /// Host to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port for the server
    #[arg(long, default_value_t = 8390)]
    pub port: u16,

    /// Seconds an unconsumed share stays valid
    #[arg(long, default_value_t = 3600)]
    pub ttl_secs: i64,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 60)]
    pub sweep_secs: u64,

    /// Negotiation messages buffered per direction before the oldest is dropped
    #[arg(long, default_value_t = 32)]
    pub queue_capacity: usize,

    /// Longest a signal poll waits for a message before returning empty (milliseconds)
    #[arg(long, default_value_t = 25_000)]
    pub poll_wait_ms: u64,
}

#[derive(Clone)]
struct AppState {
    coordinator: ShareCoordinator,
    poll_wait: Duration,
}

/// Maps share errors onto HTTP responses with the `{"error": ...}` body
/// shape browsers expect from the API.
struct ApiError(ShareError);

impl From<ShareError> for ApiError {
    fn from(err: ShareError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ShareError::NotFound => StatusCode::NOT_FOUND,
            ShareError::Expired => StatusCode::GONE,
            ShareError::AlreadyPaired
            | ShareError::NotPaired
            | ShareError::InvalidTransition { .. } => StatusCode::CONFLICT,
            ShareError::UnknownSender(_) => StatusCode::BAD_REQUEST,
            ShareError::CodeCollision | ShareError::GenerationExhausted => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        // A dead code must read the same as one that never existed.
        let message = match &self.0 {
            ShareError::NotFound | ShareError::Expired => {
                "invalid or expired share code".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishRequest {
    filename: String,
    size: u64,
    file_hash: String,
}

#[derive(Serialize)]
struct PublishResponse {
    code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShareDetails {
    filename: String,
    size: u64,
    file_hash: String,
    status: SessionStatus,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct SignalRequest {
    role: String,
    kind: SignalKind,
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct PollQuery {
    role: String,
    #[serde(default)]
    since: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShareSummary {
    code: String,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    participants: usize,
    dropped_to_subscriber: u64,
    dropped_to_publisher: u64,
}

/// Builds the router. Split out of [`run_server`] so tests can serve the
/// same app from an ephemeral port.
pub fn app(coordinator: ShareCoordinator, poll_wait: Duration) -> Router {
    let state = AppState {
        coordinator,
        poll_wait,
    };

    Router::new()
        .route("/share", post(publish_share))
        .route("/share/{code}", get(get_share).delete(cancel_share))
        .route("/share/{code}/subscribe", post(subscribe_share))
        .route("/share/{code}/signal", post(post_signal).get(get_signal))
        .route("/share/{code}/complete", post(complete_share))
        .route("/shares", get(list_shares))
        .with_state(state)
}

/// Starts the share server and its expiry reaper.
///
/// Runs until the process exits. The reaper sweeps the session table every
/// `sweep_secs`, expiring shares older than `ttl_secs` and purging records
/// that have lingered past their grace window.
pub async fn run_server(args: Args) -> Result<()> {
    let store = SessionStore::new();
    let coordinator = ShareCoordinator::new(store.clone(), args.queue_capacity);

    tokio::spawn(session::run_reaper(
        store,
        chrono::Duration::seconds(args.ttl_secs),
        Duration::from_secs(args.sweep_secs),
    ));

    let app = app(coordinator, Duration::from_millis(args.poll_wait_ms));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        "Share server listening on {} (ttl {}s, sweep every {}s)",
        addr, args.ttl_secs, args.sweep_secs
    );

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {:?}", e);
    }

    Ok(())
}

async fn publish_share(
    State(state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
    let code = state.coordinator.publish(ShareMeta {
        filename: request.filename,
        size: request.size,
        file_hash: request.file_hash,
    })?;
    Ok(Json(PublishResponse { code }))
}

async fn get_share(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ShareDetails>, ApiError> {
    let session = state.coordinator.lookup(&code)?;
    Ok(Json(ShareDetails {
        filename: session.meta.filename,
        size: session.meta.size,
        file_hash: session.meta.file_hash,
        status: session.status,
        created_at: session.created_at,
    }))
}

async fn subscribe_share(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ShareMeta>, ApiError> {
    let meta = state.coordinator.subscribe(&code)?;
    Ok(Json(meta))
}

async fn post_signal(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<SignalRequest>,
) -> Result<StatusCode, ApiError> {
    let from = Role::parse(&request.role)?;
    state
        .coordinator
        .relay(&code, from, request.kind, request.payload)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_signal(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<PollQuery>,
) -> Result<Json<SignalBatch>, ApiError> {
    let role = Role::parse(&query.role)?;
    let batch = state
        .coordinator
        .poll(&code, role, query.since, state.poll_wait)
        .await?;
    Ok(Json(batch))
}

async fn complete_share(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.complete(&code)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_share(State(state): State<AppState>, Path(code): Path<String>) -> StatusCode {
    state.coordinator.cancel(&code);
    StatusCode::NO_CONTENT
}

async fn list_shares(State(state): State<AppState>) -> Json<Vec<ShareSummary>> {
    let shares = state
        .coordinator
        .list()
        .into_iter()
        .map(|session| ShareSummary {
            participants: session.participants(),
            dropped_to_subscriber: session.channels.inbound(Role::Subscriber).dropped(),
            dropped_to_publisher: session.channels.inbound(Role::Publisher).dropped(),
            code: session.code,
            status: session.status,
            created_at: session.created_at,
        })
        .collect();
    Json(shares)
}
