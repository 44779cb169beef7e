//! Wire error types.

use std::time::Duration;

use thiserror::Error;

/// Errors talking to a node.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http handshake with {address}: {source}")]
    Handshake {
        address: String,
        #[source]
        source: hyper::Error,
    },

    #[error("request to {address} failed: {source}")]
    Request {
        address: String,
        #[source]
        source: hyper::Error,
    },

    #[error("request to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error("{method} {path} on {address} returned HTTP {status}")]
    Status {
        address: String,
        method: String,
        path: String,
        status: u16,
    },

    #[error("malformed wire message: {0}")]
    Decode(#[from] serde_json::Error),

    /// The node answered with a non-zero wire `status`.
    #[error("node reported status {status}: {message}")]
    Protocol { status: i64, message: String },
}

pub type WireResult<T> = Result<T, WireError>;
