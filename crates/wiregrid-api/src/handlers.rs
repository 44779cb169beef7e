//! HTTP handlers.
//!
//! Protocol routes (`/wd/hub/...`) answer the way a node would: upstream
//! responses are passed through untouched and grid-side failures are plain
//! text. Grid routes (`/grid/...`) answer JSON.

use std::collections::HashMap;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use wiregrid_core::{Capabilities, NodeClass};
use wiregrid_pool::Node;
use wiregrid_proxy::{CapturedResponse, DispatchError};

use crate::ApiState;

/// Upper bound on a buffered request body.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Response wrapper for consistent grid API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn plain_error(status: StatusCode, msg: String) -> Response {
    (status, [("content-type", "text/plain; charset=utf-8")], msg).into_response()
}

/// Replay a captured node response to the client.
fn relay(captured: CapturedResponse) -> Response {
    let mut response = Response::new(Body::from(captured.body));
    *response.status_mut() = captured.status;
    *response.headers_mut() = captured.headers;
    response
}

async fn buffer(request: Request) -> Result<axum::http::Request<Bytes>, Response> {
    let (parts, body) = request.into_parts();
    match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => Ok(axum::http::Request::from_parts(parts, bytes)),
        Err(e) => Err(plain_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Can't read request body: {e}"),
        )),
    }
}

/// `desiredCapabilities` of a new-session body.
fn desired_capabilities(body: &[u8]) -> Result<Capabilities, String> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| format!("Can't parse request body: {e}"))?;
    match value.get("desiredCapabilities") {
        Some(caps) if caps.is_object() => serde_json::from_value(caps.clone())
            .map_err(|e| format!("Can't parse 'desiredCapabilities': {e}")),
        _ => Err("Not passed 'desiredCapabilities'".to_string()),
    }
}

// ── Protocol ───────────────────────────────────────────────────

/// POST /wd/hub/session
pub async fn create_session(State(state): State<ApiState>, request: Request) -> Response {
    if *request.method() != Method::POST {
        return plain_error(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("Method {} not allowed", request.method()),
        );
    }

    let request = match buffer(request).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    let capabilities = match desired_capabilities(request.body()) {
        Ok(caps) => caps,
        Err(msg) => {
            warn!(error = %msg, "rejected create-session request");
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, msg);
        }
    };

    // Dropping this handler (client gone) or shutting down cancels the call.
    let cancel = state.shutdown.child_token();
    let _cancel_on_drop = cancel.clone().drop_guard();

    match state
        .dispatcher
        .create_session(&capabilities, &request, &cancel)
        .await
    {
        Ok(created) => relay(created.response),
        Err(e) => plain_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Can't create session: {e}"),
        ),
    }
}

/// any /wd/hub/session/{id}[/{*rest}]
pub async fn session_call(
    State(state): State<ApiState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
) -> Response {
    let Some(session_id) = params.get("id").cloned() else {
        return plain_error(StatusCode::NOT_FOUND, "Missing session id".to_string());
    };
    let request = match buffer(request).await {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.sessions.forward(&session_id, &request).await {
        Ok(captured) => relay(captured),
        Err(DispatchError::UnknownSession(id)) => {
            plain_error(StatusCode::NOT_FOUND, format!("Unknown session: {id}"))
        }
        Err(DispatchError::Node(e)) => {
            warn!(%session_id, error = %e, "session call failed");
            plain_error(StatusCode::BAD_GATEWAY, format!("Session node failed: {e}"))
        }
        Err(e) => plain_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ── Nodes ──────────────────────────────────────────────────────

/// Node as reported by the grid API.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeView {
    pub address: String,
    pub class: NodeClass,
    pub state: String,
    pub capabilities: Capabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_for_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl From<&Node> for NodeView {
    fn from(node: &Node) -> Self {
        Self {
            address: node.address.clone(),
            class: node.node_class,
            state: node.state.as_str().to_string(),
            capabilities: node.capabilities.clone(),
            reserved_for_secs: node.reserved_at.map(|t| t.elapsed().as_secs()),
            session_id: node.session_id.clone(),
        }
    }
}

/// Where a selenium node says it can be reached.
#[derive(Debug, Deserialize)]
pub struct NodeConfiguration {
    pub url: Option<String>,
    #[serde(rename = "remoteHost")]
    pub remote_host: Option<String>,
}

/// Registration body: either the grid's own shape or a selenium node's.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RegisterRequest {
    Direct {
        address: String,
        #[serde(default)]
        capabilities: Capabilities,
    },
    Selenium {
        configuration: NodeConfiguration,
        #[serde(default)]
        capabilities: Vec<Capabilities>,
    },
}

impl RegisterRequest {
    /// Normalized `host:port` and capabilities of the node.
    pub fn into_node(self) -> Result<(String, Capabilities), String> {
        match self {
            RegisterRequest::Direct {
                address,
                capabilities,
            } => Ok((normalize_address(&address)?, capabilities)),
            RegisterRequest::Selenium {
                configuration,
                capabilities,
            } => {
                let raw = configuration
                    .url
                    .or(configuration.remote_host)
                    .ok_or_else(|| "configuration has neither 'url' nor 'remoteHost'".to_string())?;
                let caps = capabilities.into_iter().next().unwrap_or_default();
                Ok((normalize_address(&raw)?, caps))
            }
        }
    }
}

/// `http://host:port/wd/hub` → `host:port`; bare `host:port` is kept.
fn normalize_address(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if raw.contains("://") {
        let uri: Uri = raw.parse().map_err(|e| format!("invalid node url {raw}: {e}"))?;
        return uri
            .authority()
            .map(|a| a.as_str().to_string())
            .ok_or_else(|| format!("node url {raw} has no host"));
    }
    let address = raw.trim_end_matches('/');
    if address.is_empty() {
        return Err("empty node address".to_string());
    }
    Ok(address.to_string())
}

/// POST /grid/register
pub async fn register_node(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let (address, capabilities) = match req.into_node() {
        Ok(node) => node,
        Err(msg) => return error_response(&msg, StatusCode::BAD_REQUEST).into_response(),
    };

    match state.pool.register(&address, capabilities) {
        Ok(is_new) => {
            info!(node = %address, is_new, "node registration");
            let status = if is_new {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            match state.pool.manager().registry().get(&address) {
                Some(node) => (status, ApiResponse::ok(NodeView::from(&node))).into_response(),
                None => error_response("node vanished during registration", StatusCode::CONFLICT)
                    .into_response(),
            }
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /grid/api/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.pool.snapshot();
    let nodes: Vec<NodeView> = snapshot.nodes().iter().map(NodeView::from).collect();
    ApiResponse::ok(nodes)
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.pool.metrics().snapshot(state.pool.node_counts());
    let body = wiregrid_metrics::render_prometheus(&snapshot);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
