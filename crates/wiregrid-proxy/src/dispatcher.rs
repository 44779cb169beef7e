//! Dispatcher — the create-session control flow.
//!
//! ```text
//!   ┌──────────────┐
//!   │ cancelled? ──┼──▶ RequestCancelled
//!   └──────┬───────┘
//!          ▼
//!   reserve(caps, tried) ──NoCapacity──▶ capacity error
//!          │
//!          ▼
//!   pre-flight reset ──fail──▶ evict ─┐
//!          │                          │
//!          ▼                          │
//!   forward + classify ──fail──▶ evict┤
//!          │                          │
//!          ▼                          │
//!   confirm ──lost──▶ close session ──┤
//!          │                          │
//!          ▼                          ▼
//!   return response              next reservation
//! ```
//!
//! Every failure is blamed on the node. The loop ends when a node creates
//! the session or the pool has nothing left to offer; each evicted node is
//! also remembered in `tried` so it is never offered twice to the same
//! request.

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use http::Request;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wiregrid_core::Capabilities;
use wiregrid_jsonwire::{DEFAULT_CALL_TIMEOUT, NodeClient};
use wiregrid_pool::{EvictReason, NodePool, PoolError};

use crate::error::{DispatchError, DispatchResult};
use crate::transport::{CapturedResponse, SessionTransport};

/// A session created on a node.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: String,
    pub node_address: String,
    /// The node's answer, to be returned to the client unchanged.
    pub response: CapturedResponse,
    /// Nodes tried, the successful one included.
    pub attempts: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    pool: NodePool,
    transport: SessionTransport,
    client_timeout: Duration,
    create_timeout: Duration,
}

impl Dispatcher {
    /// `create_timeout` bounds a whole create-session call, retries included.
    pub fn new(pool: NodePool, create_timeout: Duration) -> Self {
        Self {
            pool,
            transport: SessionTransport::new(create_timeout),
            client_timeout: DEFAULT_CALL_TIMEOUT,
            create_timeout,
        }
    }

    /// Replace the transport, e.g. to bound single forwards differently.
    pub fn with_transport(mut self, transport: SessionTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Bound on each pre-flight reset call.
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    /// Create a session for `capabilities` by forwarding `request` to a
    /// suitable node, retrying on other nodes until one succeeds.
    ///
    /// Cancelling `cancel` (or dropping the returned future) abandons the
    /// attempt; the held reservation is released or evicted by its guard.
    pub async fn create_session(
        &self,
        capabilities: &Capabilities,
        request: &Request<Bytes>,
        cancel: &CancellationToken,
    ) -> DispatchResult<CreatedSession> {
        if cancel.is_cancelled() {
            self.pool.metrics().record_cancelled();
            return Err(DispatchError::RequestCancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.pool.metrics().record_cancelled();
                info!("create-session request cancelled by client");
                Err(DispatchError::RequestCancelled)
            }
            result = tokio::time::timeout(self.create_timeout, self.dispatch(capabilities, request)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(timeout_secs = self.create_timeout.as_secs(), "create-session timed out");
                        Err(DispatchError::Timeout(self.create_timeout))
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        capabilities: &Capabilities,
        request: &Request<Bytes>,
    ) -> DispatchResult<CreatedSession> {
        let mut tried: HashSet<String> = HashSet::new();

        loop {
            let mut reservation = match self.pool.reserve(capabilities, &tried) {
                Ok(reservation) => reservation,
                Err(PoolError::NoCapacity) => {
                    self.pool.metrics().record_capacity_rejection();
                    info!(?capabilities, tried = tried.len(), "no capacity for create-session");
                    return Err(DispatchError::NoCapacity);
                }
                Err(e) => return Err(e.into()),
            };
            let address = reservation.address().to_string();
            tried.insert(address.clone());
            self.pool.metrics().record_node_attempt();
            debug!(node = %address, attempt = tried.len(), "trying node");

            reservation.begin_node_call();

            let client = NodeClient::for_class(reservation.node().node_class, address.as_str())
                .with_timeout(self.client_timeout);
            if let Err(e) = client.remove_all_sessions().await {
                warn!(node = %address, error = %e, "pre-flight reset failed, evicting node");
                reservation.evict(EvictReason::NodeFailure);
                continue;
            }

            let outcome = match self.transport.create_session(&address, request).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(node = %address, error = %e, "create-session call failed, evicting node");
                    reservation.evict(EvictReason::NodeFailure);
                    continue;
                }
            };

            let Some(session_id) = outcome.session_id else {
                warn!(
                    node = %address,
                    status = %outcome.response.status,
                    "node did not create a session, evicting node"
                );
                reservation.evict(EvictReason::NodeFailure);
                continue;
            };

            if let Err(e) = reservation.confirm(&session_id) {
                // Swept while the node was answering: nothing routes to this
                // session, so it must not reach the client.
                warn!(node = %address, %session_id, error = %e, "reservation lost, closing orphaned session");
                if let Err(e) = client.close_session(&session_id).await {
                    debug!(node = %address, %session_id, error = %e, "orphaned session not closed");
                }
                continue;
            }
            info!(node = %address, %session_id, attempts = tried.len(), "session created");
            return Ok(CreatedSession {
                session_id,
                node_address: address,
                response: outcome.response,
                attempts: tried.len(),
            });
        }
    }
}
