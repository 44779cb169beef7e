//! One-shot HTTP/1.1 exchanges with a node.
//!
//! Every call opens a fresh connection: nodes are few, calls are rare
//! compared to their cost, and a pooled connection to a node that was just
//! evicted would only linger.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Request, Response, header};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::{WireError, WireResult};

pub const USER_AGENT: &str = "wiregrid/0.1";

/// Headers meaningful only for a single connection; never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
];

/// Drop hop-by-hop headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

/// Send `request` to `address` and collect the full response.
///
/// The request URI should be in origin form (`/path?query`); a `Host`
/// header naming the node is added when the request has none.
pub async fn round_trip(
    address: &str,
    mut request: Request<Full<Bytes>>,
    timeout: Duration,
) -> WireResult<Response<Bytes>> {
    if !request.headers().contains_key(header::HOST) {
        if let Ok(host) = HeaderValue::from_str(address) {
            request.headers_mut().insert(header::HOST, host);
        }
    }
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|source| WireError::Connect {
                address: address.to_string(),
                source,
            })?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|source| WireError::Handshake {
                address: address.to_string(),
                source,
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                trace!(error = %e, "node connection closed with error");
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|source| WireError::Request {
                address: address.to_string(),
                source,
            })?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|source| WireError::Request {
                address: address.to_string(),
                source,
            })?
            .to_bytes();
        Ok(Response::from_parts(parts, body))
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => {
            if let Ok(resp) = &result {
                debug!(node = %address, %method, %path, status = %resp.status(), "node call finished");
            }
            result
        }
        Err(_) => Err(WireError::Timeout {
            address: address.to_string(),
            timeout,
        }),
    }
}

/// Bodiless call expecting a 2xx JSON answer.
pub async fn call_json<T: DeserializeOwned>(
    address: &str,
    method: Method,
    path: &str,
    timeout: Duration,
) -> WireResult<T> {
    let request = Request::builder()
        .method(method.clone())
        .uri(path)
        .header(header::USER_AGENT, USER_AGENT)
        .header(header::ACCEPT, "application/json")
        .body(Full::new(Bytes::new()))?;

    let response = round_trip(address, request, timeout).await?;
    if !response.status().is_success() {
        return Err(WireError::Status {
            address: address.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(serde_json::from_slice(response.body())?)
}
