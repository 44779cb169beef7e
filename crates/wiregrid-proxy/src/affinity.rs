//! Session affinity forwarding.
//!
//! Every call on an existing session goes to the node that created it,
//! found through the persisted affinity record. Closing a session through
//! the grid frees its node.

use bytes::Bytes;
use http::{Method, Request};
use tracing::{debug, warn};

use wiregrid_pool::NodePool;

use crate::error::{DispatchError, DispatchResult};
use crate::transport::{CapturedResponse, SessionTransport};

/// Path prefix of session-scoped protocol calls.
pub const SESSION_PREFIX: &str = "/wd/hub/session";

#[derive(Clone)]
pub struct SessionRouter {
    pool: NodePool,
    transport: SessionTransport,
}

impl SessionRouter {
    pub fn new(pool: NodePool, transport: SessionTransport) -> Self {
        Self { pool, transport }
    }

    /// Forward `request` to the node owning `session_id`.
    pub async fn forward(
        &self,
        session_id: &str,
        request: &Request<Bytes>,
    ) -> DispatchResult<CapturedResponse> {
        let address = self
            .pool
            .lookup_session(session_id)?
            .ok_or_else(|| DispatchError::UnknownSession(session_id.to_string()))?;

        let response = self.transport.forward(&address, request).await?;
        debug!(%session_id, node = %address, method = %request.method(), status = %response.status, "session call forwarded");

        if closes_session(request, session_id) && response.status.is_success() {
            if let Err(e) = self.pool.end_session(session_id) {
                warn!(%session_id, node = %address, error = %e, "session closed on node but not held by pool");
            }
        }
        Ok(response)
    }
}

fn closes_session(request: &Request<Bytes>, session_id: &str) -> bool {
    if *request.method() != Method::DELETE {
        return false;
    }
    let path = request.uri().path().trim_end_matches('/');
    path.strip_prefix(SESSION_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|id| id == session_id)
}
