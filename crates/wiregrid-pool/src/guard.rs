//! Reservation guard.
//!
//! A reserved node must end up confirmed, released or evicted on every
//! path out of a create-session attempt, including the caller's future
//! being dropped. The guard settles the reservation on drop:
//!
//! - nothing sent to the node yet → the node goes back to `Free`
//! - a node call was in flight → the node's session state is unknown,
//!   so it is evicted
//!
//! Every settlement is tied to the reservation the guard was handed. Once
//! the sweep has taken the node away, a late settlement is a no-op even if
//! the same address has been registered and reserved again since.

use tracing::{debug, warn};

use crate::error::PoolResult;
use crate::pool::{EvictReason, NodePool};
use crate::registry::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    InFlight,
    Settled,
}

/// An outstanding reservation of one node.
pub struct Reservation {
    pool: NodePool,
    node: Node,
    stage: Stage,
}

impl Reservation {
    pub(crate) fn new(pool: NodePool, node: Node) -> Self {
        Self {
            pool,
            node,
            stage: Stage::Idle,
        }
    }

    /// The node as it was when reserved.
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn address(&self) -> &str {
        &self.node.address
    }

    /// Call before talking to the node. From here on, dropping the guard
    /// evicts the node instead of releasing it.
    pub fn begin_node_call(&mut self) {
        if self.stage == Stage::Idle {
            self.stage = Stage::InFlight;
        }
    }

    /// The node created `session_id`: keep it reserved as busy.
    ///
    /// Fails with `StaleReservation` if the reservation was lost meanwhile;
    /// the session then has no node in the pool.
    pub fn confirm(mut self, session_id: &str) -> PoolResult<Node> {
        self.stage = Stage::Settled;
        self.pool.confirm(&self.node, session_id)
    }

    /// Hand the node back without having created a session on it.
    pub fn release(mut self) -> PoolResult<Node> {
        self.stage = Stage::Settled;
        self.pool.release(&self.node)
    }

    /// The node misbehaved: remove it from the pool. `None` if the
    /// reservation was already lost.
    pub fn evict(mut self, reason: EvictReason) -> Option<Node> {
        self.stage = Stage::Settled;
        self.pool.evict_held(&self.node, reason)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        match self.stage {
            Stage::Settled => {}
            Stage::Idle => {
                debug!(node = %self.node.address, "reservation dropped before use, releasing");
                if let Err(e) = self.pool.release(&self.node) {
                    // Already swept or evicted elsewhere.
                    debug!(node = %self.node.address, error = %e, "release on drop skipped");
                }
            }
            Stage::InFlight => {
                if self.pool.evict_held(&self.node, EvictReason::Cancelled).is_some() {
                    warn!(node = %self.node.address, "reservation dropped mid-call, node evicted");
                }
            }
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("node", &self.node.address)
            .field("stage", &self.stage)
            .finish()
    }
}
