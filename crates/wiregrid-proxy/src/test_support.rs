//! Fake automation nodes for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde_json::json;

use wiregrid_core::{Capabilities, GridSection, Strategy};
use wiregrid_metrics::GridMetrics;
use wiregrid_pool::NodePool;
use wiregrid_state::StateStore;

/// Serve `app` on an ephemeral local port; returns `host:port`.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

/// How a fake selenium node answers.
#[derive(Debug, Clone, Copy)]
pub enum NodeBehavior {
    /// Creates a session with this id.
    Healthy(&'static str),
    /// Session listing fails, so the pre-flight reset fails.
    BrokenReset,
    /// Answers create-session with 200 but no session object.
    NoSession,
    /// Never answers create-session.
    Hang,
    /// Creates a session with this id after the delay.
    Slow(&'static str, Duration),
}

pub struct FakeNode {
    pub address: String,
    pub create_calls: Arc<AtomicUsize>,
    pub delete_calls: Arc<AtomicUsize>,
}

impl FakeNode {
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

pub async fn fake_node(behavior: NodeBehavior) -> FakeNode {
    let create_calls = Arc::new(AtomicUsize::new(0));
    let calls = create_calls.clone();
    let delete_calls = Arc::new(AtomicUsize::new(0));
    let deletes = delete_calls.clone();

    let app = Router::new()
        .route(
            "/wd/hub/sessions",
            get(move || async move {
                match behavior {
                    NodeBehavior::BrokenReset => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "broken".to_string())
                    }
                    _ => (StatusCode::OK, json!({"status": 0, "value": []}).to_string()),
                }
            }),
        )
        .route(
            "/wd/hub/session",
            post(move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    match behavior {
                        NodeBehavior::Healthy(id) => (
                            StatusCode::OK,
                            json!({"status": 0, "sessionId": id, "value": {"browserName": "chrome"}})
                                .to_string(),
                        ),
                        NodeBehavior::Hang => {
                            tokio::time::sleep(Duration::from_secs(3600)).await;
                            (StatusCode::OK, String::new())
                        }
                        NodeBehavior::Slow(id, delay) => {
                            tokio::time::sleep(delay).await;
                            (
                                StatusCode::OK,
                                json!({"status": 0, "sessionId": id, "value": {}}).to_string(),
                            )
                        }
                        _ => (StatusCode::OK, json!({"status": 0, "value": {}}).to_string()),
                    }
                }
            }),
        )
        .route(
            "/wd/hub/session/{id}/url",
            get(|| async { json!({"status": 0, "value": "https://example.org"}).to_string() }),
        )
        .route(
            "/wd/hub/session/{id}",
            axum::routing::delete(move || {
                let deletes = deletes.clone();
                async move {
                    deletes.fetch_add(1, Ordering::SeqCst);
                    json!({"status": 0, "value": null}).to_string()
                }
            }),
        );

    FakeNode {
        address: serve(app).await,
        create_calls,
        delete_calls,
    }
}

pub fn grid_section(strategies: Vec<Strategy>) -> GridSection {
    GridSection {
        port: 4444,
        busy_node_duration: Duration::from_secs(600),
        reserved_node_duration: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(30),
        session_create_timeout: Duration::from_secs(30),
        strategy_list: strategies,
        nodes: Vec::new(),
    }
}

/// Pool over an in-memory store holding `addresses`, in order.
pub fn pool_with(addresses: &[&str]) -> NodePool {
    let pool = NodePool::from_config(
        &grid_section(Vec::new()),
        StateStore::open_in_memory().unwrap(),
        Arc::new(GridMetrics::new()),
    )
    .unwrap();
    for addr in addresses {
        pool.register(addr, Capabilities::new()).unwrap();
    }
    pool
}
