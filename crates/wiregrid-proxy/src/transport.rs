//! Session transport — one proxied exchange with one node.
//!
//! The transport forwards a client request to a node unchanged, captures
//! the node's answer unchanged, and for create-session calls classifies
//! the answer by its body. It never touches the pool: deciding what a
//! failed exchange means is the dispatcher's job.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode, Uri};
use http_body_util::Full;
use tracing::debug;

use wiregrid_jsonwire::exchange::{round_trip, strip_hop_by_hop};
use wiregrid_jsonwire::{WireResult, created_session_id};

/// A node's response, held in memory until it is handed to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    fn from_response(response: Response<Bytes>) -> Self {
        let (parts, body) = response.into_parts();
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        Self {
            status: parts.status,
            headers,
            body,
        }
    }
}

/// Result of a create-session exchange.
#[derive(Debug, Clone)]
pub struct TransportOutcome {
    pub response: CapturedResponse,
    /// Set only when the body is a well-formed new-session object.
    pub session_id: Option<String>,
}

impl TransportOutcome {
    pub fn is_success(&self) -> bool {
        self.session_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SessionTransport {
    timeout: Duration,
}

impl SessionTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Forward `request` to the node at `address` and capture the answer.
    pub async fn forward(
        &self,
        address: &str,
        request: &Request<Bytes>,
    ) -> WireResult<CapturedResponse> {
        let outgoing = outgoing_request(request)?;
        let response = round_trip(address, outgoing, self.timeout).await?;
        Ok(CapturedResponse::from_response(response))
    }

    /// Forward a create-session request and classify the answer.
    ///
    /// A 2xx status alone is not success: the body must carry a session.
    pub async fn create_session(
        &self,
        address: &str,
        request: &Request<Bytes>,
    ) -> WireResult<TransportOutcome> {
        let response = self.forward(address, request).await?;
        let session_id = created_session_id(&response.body);
        if session_id.is_none() {
            debug!(
                node = %address,
                status = %response.status,
                body_len = response.body.len(),
                "node answer carries no session"
            );
        }
        Ok(TransportOutcome {
            response,
            session_id,
        })
    }
}

/// Rebuild the client's request for the node: same method, path, query,
/// headers and body; origin-form URI.
fn outgoing_request(request: &Request<Bytes>) -> Result<Request<Full<Bytes>>, http::Error> {
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut builder = Request::builder()
        .method(request.method().clone())
        .uri(Uri::try_from(path)?)
        .version(http::Version::HTTP_11);
    if let Some(headers) = builder.headers_mut() {
        *headers = request.headers().clone();
        strip_hop_by_hop(headers);
    }
    builder.body(Full::new(request.body().clone()))
}
