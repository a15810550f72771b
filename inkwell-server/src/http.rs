//! Inkwell HTTP API
//!
//! Axum-based HTTP server exposing the story and website engines.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function. The inner functions are directly testable without axum dispatch
//! machinery.
//!
//! Endpoints:
//! - GET  /ping                 — liveness probe
//! - GET  /health               — health check with store status
//! - GET  /version              — server version info
//! - POST /story                — start or continue a story session
//! - POST /website              — generate a website and queue its refinement
//! - GET  /website/:website_id  — fetch the next available website iteration

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use inkwell_core::config::{HttpConfig, StoryConfig};
use inkwell_core::{CompletionClient, CompletionError, InkwellError, TranscriptStore};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::sessions::SessionLocks;
use crate::subsystems::story::StoryEngine;
use crate::subsystems::website::WebsiteEngine;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn TranscriptStore>,
    pub story: StoryEngine,
    pub website: WebsiteEngine,
}

impl HttpState {
    /// Wire both engines to the same store, client and lock table.
    pub fn new(
        store: Arc<dyn TranscriptStore>,
        client: Arc<dyn CompletionClient>,
        story_config: StoryConfig,
    ) -> Self {
        let locks = SessionLocks::new();
        Self {
            story: StoryEngine::new(store.clone(), client.clone(), locks.clone(), story_config),
            website: WebsiteEngine::new(store.clone(), client, locks),
            store,
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/story", post(story_handler))
        .route("/website", post(website_handler))
        .route("/website/:website_id", get(fetch_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    config: &HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Inkwell HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StoryRequest {
    pub story_id: Option<String>,
    /// "A" or "B"; omitted on the first request of a session.
    pub choice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebsiteRequest {
    pub website_id: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }

    fn into_value(self) -> serde_json::Value {
        serde_json::json!({
            "error": self.error,
            "status": self.status,
        })
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — asks the store backend and returns (status_code, json_body).
pub async fn health_inner(store: &dyn TranscriptStore) -> (StatusCode, serde_json::Value) {
    match store.health().await {
        Ok(detail) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": store.name(),
                "store_detail": detail,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "store": store.name(),
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "inkwell/1",
    })
}

/// Inner story — starts or continues the session, then queues branch
/// precomputation for the beat just served.
pub async fn story_inner(state: &HttpState, req: StoryRequest) -> (StatusCode, serde_json::Value) {
    let story_id = match non_empty(req.story_id) {
        Some(id) => id,
        None => return bad_request("story_id field is required"),
    };

    match state.story.respond(&story_id, req.choice.as_deref()).await {
        Ok(step) => {
            if state.story.config().precompute && !step.beat.is_over {
                state.story.spawn_precompute(&story_id);
            }
            (
                StatusCode::OK,
                serde_json::json!({
                    "story_id": story_id,
                    "sequence_index": step.sequence_index,
                    "source": step.source,
                    "beat": step.beat,
                }),
            )
        }
        Err(e) => {
            tracing::warn!(story_id = %story_id, error = %e, "Story request failed");
            error_response(&e)
        }
    }
}

/// Inner website — generates iteration 0, then queues the refinement script.
pub async fn website_inner(state: &HttpState, req: WebsiteRequest) -> (StatusCode, serde_json::Value) {
    let website_id = match non_empty(req.website_id) {
        Some(id) => id,
        None => return bad_request("website_id field is required"),
    };

    match state.website.generate(&website_id).await {
        Ok(html) => {
            state.website.spawn_iterate(&website_id);
            (StatusCode::OK, serde_json::json!({ "website": html }))
        }
        Err(e) => {
            tracing::warn!(website_id = %website_id, error = %e, "Website generation failed");
            error_response(&e)
        }
    }
}

/// Inner fetch — serves the version under the session's cursor.
pub async fn fetch_inner(state: &HttpState, website_id: &str) -> (StatusCode, serde_json::Value) {
    match state.website.fetch_current(website_id).await {
        Ok(fetched) => (
            StatusCode::OK,
            serde_json::json!({
                "iteration": fetched.iteration,
                "cursor": fetched.cursor,
                "website": fetched.website,
            }),
        ),
        Err(e) => error_response(&e),
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn ping_handler() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn story_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<StoryRequest>,
) -> impl IntoResponse {
    let (status, body) = story_inner(&state, req).await;
    (status, Json(body))
}

pub async fn website_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<WebsiteRequest>,
) -> impl IntoResponse {
    let (status, body) = website_inner(&state, req).await;
    (status, Json(body))
}

pub async fn fetch_handler(
    State(state): State<Arc<HttpState>>,
    Path(website_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = fetch_inner(&state, &website_id).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// HTTP status for an engine error.
pub fn status_for(error: &InkwellError) -> StatusCode {
    match error {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        InkwellError::Completion(c) if c.is_schema_violation() => StatusCode::BAD_GATEWAY,
        InkwellError::Completion(CompletionError::RetryExhausted { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        InkwellError::Completion(c) if c.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(error: &InkwellError) -> (StatusCode, serde_json::Value) {
    (status_for(error), ErrorResponse::new(error.to_string()).into_value())
}

fn bad_request(msg: &str) -> (StatusCode, serde_json::Value) {
    (StatusCode::BAD_REQUEST, ErrorResponse::new(msg).into_value())
}

fn non_empty(id: Option<String>) -> Option<String> {
    id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================
