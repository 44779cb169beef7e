//! Proxy error types.

use std::time::Duration;

use thiserror::Error;

use wiregrid_jsonwire::WireError;
use wiregrid_pool::PoolError;

/// Errors surfaced by dispatch and session forwarding.
///
/// Node failures during create-session never show up here: the
/// dispatcher evicts the node and retries. They only become visible as
/// `NoCapacity` once every candidate is gone.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request cancelled by client")]
    RequestCancelled,

    #[error("no free node satisfies the requested capabilities")]
    NoCapacity,

    #[error("session creation timed out after {0:?}")]
    Timeout(Duration),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Forwarding a call on an existing session failed.
    #[error("node error: {0}")]
    Node(#[from] WireError),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
