//! HTTP integration tests for the Inkwell REST API
//!
//! These run the full Axum router via `oneshot` over an in-memory store and a
//! scripted completion client, so they need no database or network.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{page_html, ScriptedClient};
use inkwell_core::config::StoryConfig;
use inkwell_core::models::{Choice, StorySession};
use inkwell_core::store::{self, story_key};
use inkwell_core::MemoryStore;
use inkwell_server::http::{build_router, health_inner, HttpState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn make_state(client: ScriptedClient) -> Arc<HttpState> {
    Arc::new(HttpState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(client),
        StoryConfig::default(),
    ))
}

async fn send(state: &Arc<HttpState>, req: Request<Body>) -> (StatusCode, Value) {
    let resp = build_router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&payload).unwrap()))
        .unwrap()
}

/// Poll until the background precompute has stored both branches.
async fn wait_for_branches(state: &HttpState, story_id: &str) -> StorySession {
    for _ in 0..100 {
        let session: StorySession = store::load(state.store.as_ref(), &story_key(story_id))
            .await
            .unwrap();
        if session.precomputed_branches.len() == 2 {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("branches for {} were never precomputed", story_id);
}

// ===========================================================================
// TEST 1: GET /ping and /version
// ===========================================================================
#[tokio::test]
async fn test_ping_and_version() {
    let state = make_state(ScriptedClient::storyteller());

    let resp = build_router(state.clone()).oneshot(get("/ping")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"pong");

    let (status, json) = send(&state, get("/version")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["version"].is_string());
    assert_eq!(json["protocol"], "inkwell/1");
}

// ===========================================================================
// TEST 2: GET /health reports the store backend
// ===========================================================================
#[tokio::test]
async fn test_health_response_structure() {
    let state = make_state(ScriptedClient::storyteller());

    let (status, body) = health_inner(state.store.as_ref()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");

    let (status, json) = send(&state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["version"].is_string());
}

// ===========================================================================
// TEST 3: POST /story starts, precomputes, then serves the cached branch
// ===========================================================================
#[tokio::test]
async fn test_story_round_trip_uses_precomputed_branch() {
    let state = make_state(ScriptedClient::storyteller());

    let (status, first) = send(&state, post("/story", json!({ "story_id": "h1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["story_id"], "h1");
    assert_eq!(first["sequence_index"], 0);
    assert_eq!(first["source"], "started");
    assert!(first["beat"]["content"].is_string());
    assert!(first["beat"]["choice_A"].is_string());
    assert_eq!(first["beat"]["is_over"], false);

    let cached = wait_for_branches(&state, "h1").await;
    let expected = serde_json::to_value(&cached.precomputed_branches[&Choice::A]).unwrap();

    let (status, second) =
        send(&state, post("/story", json!({ "story_id": "h1", "choice": "A" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["source"], "precomputed");
    assert_eq!(second["sequence_index"], 1);
    assert_eq!(second["beat"], expected);
}

// ===========================================================================
// TEST 4: POST /story rejects bad input with 400
// ===========================================================================
#[tokio::test]
async fn test_story_bad_requests() {
    let state = make_state(ScriptedClient::storyteller());

    let (status, body) = send(&state, post("/story", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, _) = send(&state, post("/story", json!({ "story_id": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&state, post("/story", json!({ "story_id": "h2" }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        send(&state, post("/story", json!({ "story_id": "h2", "choice": "C" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("C"));
}

// ===========================================================================
// TEST 5: POST /website then GET /website/:id
// ===========================================================================
#[tokio::test]
async fn test_website_generate_then_fetch() {
    let state = make_state(ScriptedClient::web_designer());

    let (status, body) = send(&state, post("/website", json!({ "website_id": "w1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["website"], page_html(0));

    let (status, fetched) = send(&state, get("/website/w1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["cursor"], 0);
    assert_eq!(fetched["iteration"], 0);
    assert_eq!(fetched["website"], page_html(0));

    let (status, fetched) = send(&state, get("/website/w1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["cursor"], 1);
    assert!(fetched["iteration"].as_u64().unwrap() <= 1);
}

// ===========================================================================
// TEST 6: unknown website ids are 404, missing ids are 400
// ===========================================================================
#[tokio::test]
async fn test_website_errors() {
    let state = make_state(ScriptedClient::web_designer());

    let (status, body) = send(&state, get("/website/nobody")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");

    let (status, _) = send(&state, post("/website", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
