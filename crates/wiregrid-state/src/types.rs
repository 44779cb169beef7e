//! Persisted record types.

use serde::{Deserialize, Serialize};

use wiregrid_core::Capabilities;

/// A node known to the grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    /// `host:port` of the node; also the table key.
    pub address: String,
    pub capabilities: Capabilities,
    /// Unix timestamp (seconds) of the last registration.
    pub registered_at: u64,
}

/// Which node owns a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    pub node_address: String,
    /// Unix timestamp (seconds) when the session was created.
    pub created_at: u64,
}
