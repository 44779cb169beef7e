//! Pool error types.

use thiserror::Error;

use crate::registry::NodeState;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No free node satisfies both the capability match and the quota.
    /// Expected under load; not a fault.
    #[error("no free node satisfies the requested capabilities")]
    NoCapacity,

    /// A concurrent actor changed the node's state first.
    #[error("node {address} is {actual:?}, expected {expected:?}")]
    StateMismatch {
        address: String,
        expected: NodeState,
        actual: NodeState,
    },

    /// The reservation was settled, swept, or replaced by a newer one.
    #[error("reservation of {0} is no longer held")]
    StaleReservation(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("no node holds session {0}")]
    SessionNotFound(String),

    #[error("state store error: {0}")]
    State(#[from] wiregrid_state::StateError),
}

pub type PoolResult<T> = Result<T, PoolError>;
