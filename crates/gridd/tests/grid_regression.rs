//! End-to-end regression tests for the grid's HTTP surface.
//!
//! The router is driven in-process with `oneshot`; automation nodes are
//! real axum servers on loopback ports.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{delete, get, post};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use wiregrid_api::{ApiState, build_router};
use wiregrid_core::{GridConfig, GridSection, MetricsConfig};
use wiregrid_metrics::GridMetrics;
use wiregrid_pool::{NodePool, NodeState};
use wiregrid_state::StateStore;

const NODE_BODY: &str = r#"{"status":0,"sessionId":"node-sess-1","value":{"browserName":"chrome"}}"#;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

/// Selenium node that creates `node-sess-1`.
async fn healthy_node() -> String {
    let app = Router::new()
        .route(
            "/wd/hub/sessions",
            get(|| async { json!({"status": 0, "value": []}).to_string() }),
        )
        .route(
            "/wd/hub/session",
            post(|| async { (StatusCode::OK, [("x-node-build", "42")], NODE_BODY) }),
        )
        .route(
            "/wd/hub/session/{id}/title",
            get(|| async { json!({"status": 0, "value": "Example"}).to_string() }),
        )
        .route(
            "/wd/hub/session/{id}",
            delete(|| async { json!({"status": 0, "value": null}).to_string() }),
        );
    serve(app).await
}

/// Selenium node whose session listing is broken.
async fn broken_node() -> String {
    let app = Router::new().route(
        "/wd/hub/sessions",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "down") }),
    );
    serve(app).await
}

fn grid() -> GridSection {
    let mut grid = GridConfig::scaffold().grid;
    grid.session_create_timeout = Duration::from_secs(10);
    grid.nodes.clear();
    grid
}

fn test_app(store: StateStore, metrics: &MetricsConfig) -> (Router, NodePool) {
    let grid = grid();
    let pool = NodePool::from_config(&grid, store, Arc::new(GridMetrics::new())).unwrap();
    let state = ApiState::new(pool.clone(), &grid, CancellationToken::new());
    (build_router(state, metrics), pool)
}

fn metrics_on() -> MetricsConfig {
    MetricsConfig {
        enable: true,
        path: "/metrics".to_string(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, body)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn register(app: &Router, address: &str) {
    let (status, _, _) = send(
        app,
        json_request(
            "POST",
            "/grid/register",
            json!({"address": address, "capabilities": {"browserName": "chrome"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn session_lifecycle_through_the_grid() {
    let node = healthy_node().await;
    let (app, pool) = test_app(StateStore::open_in_memory().unwrap(), &metrics_on());
    register(&app, &node).await;

    // Create: the node's answer comes back untouched.
    let (status, headers, body) = send(
        &app,
        json_request(
            "POST",
            "/wd/hub/session",
            json!({"desiredCapabilities": {"browserName": "chrome"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-node-build"], "42");
    assert_eq!(body, NODE_BODY.as_bytes());

    // The node is busy with the new session.
    let (_, _, body) = send(&app, empty_request("GET", "/grid/api/nodes")).await;
    let nodes: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(nodes["data"][0]["state"], "reserved");
    assert_eq!(nodes["data"][0]["session_id"], "node-sess-1");

    // Follow-up calls reach the same node.
    let (status, _, body) = send(&app, empty_request("GET", "/wd/hub/session/node-sess-1/title")).await;
    assert_eq!(status, StatusCode::OK);
    let title: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(title["value"], "Example");

    // Closing the session frees the node.
    let (status, _, _) = send(&app, empty_request("DELETE", "/wd/hub/session/node-sess-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        pool.manager().registry().get(&node).unwrap().state,
        NodeState::Free
    );
    let (status, _, _) = send(&app, empty_request("GET", "/wd/hub/session/node-sess-1/title")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn broken_node_is_skipped_and_dropped() {
    let broken = broken_node().await;
    let healthy = healthy_node().await;
    let (app, pool) = test_app(StateStore::open_in_memory().unwrap(), &metrics_on());
    register(&app, &broken).await;
    register(&app, &healthy).await;

    let (status, _, body) = send(
        &app,
        json_request("POST", "/wd/hub/session", json!({"desiredCapabilities": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, NODE_BODY.as_bytes());

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.nodes().len(), 1);
    assert_eq!(snapshot.nodes()[0].address, healthy);
    assert!(pool.store().get_node(&broken).unwrap().is_none());

    let (_, _, body) = send(&app, empty_request("GET", "/metrics")).await;
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("wiregrid_node_evictions_total{reason=\"node_failure\"} 1"));
    assert!(text.contains("wiregrid_sessions_created_total 1"));
}

#[tokio::test]
async fn exhausted_pool_answers_plain_text_error() {
    let (app, _pool) = test_app(StateStore::open_in_memory().unwrap(), &metrics_on());

    let (status, headers, body) = send(
        &app,
        json_request("POST", "/wd/hub/session", json!({"desiredCapabilities": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/plain"));
    assert!(String::from_utf8(body).unwrap().starts_with("Can't create session:"));
}

#[tokio::test]
async fn create_session_only_accepts_post() {
    let (app, _pool) = test_app(StateStore::open_in_memory().unwrap(), &metrics_on());
    let (status, _, _) = send(&app, empty_request("PUT", "/wd/hub/session")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn metrics_route_follows_config() {
    let disabled = MetricsConfig {
        enable: false,
        path: "/metrics".to_string(),
    };
    let (app, _pool) = test_app(StateStore::open_in_memory().unwrap(), &disabled);
    let (status, _, _) = send(&app, empty_request("GET", "/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let custom = MetricsConfig {
        enable: true,
        path: "/grid/metrics".to_string(),
    };
    let (app, _pool) = test_app(StateStore::open_in_memory().unwrap(), &custom);
    let (status, _, body) = send(&app, empty_request("GET", "/grid/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("# TYPE wiregrid_nodes gauge"));
}

#[tokio::test]
async fn registered_nodes_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.redb");

    {
        let store = StateStore::open(&path).unwrap();
        let (app, _pool) = test_app(store, &metrics_on());
        register(&app, "10.1.0.1:5555").await;
    }

    let store = StateStore::open(&path).unwrap();
    let (app, pool) = test_app(store, &metrics_on());
    let node = pool.manager().registry().get("10.1.0.1:5555").unwrap();
    assert_eq!(node.state, NodeState::Free);
    assert_eq!(
        node.capabilities.get("browserName"),
        Some(&json!("chrome"))
    );

    let (_, _, body) = send(&app, empty_request("GET", "/grid/api/nodes")).await;
    let nodes: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(nodes["data"].as_array().unwrap().len(), 1);
}
