//! Node registry — the in-memory source of truth for node existence and state.
//!
//! No business logic lives here: the registry only enforces that state
//! changes happen as compare-and-swap transitions and that timestamps are
//! assigned at transition time. Nodes are kept in registration order so
//! that candidate selection is reproducible.

use std::sync::RwLock;

use tokio::time::Instant;
use tracing::debug;

use wiregrid_core::{Capabilities, NodeClass};

use crate::error::{PoolError, PoolResult};

/// Reservation state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Free,
    Reserved,
    Removed,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Free => "free",
            NodeState::Reserved => "reserved",
            NodeState::Removed => "removed",
        }
    }
}

/// A worker node as seen by the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// `host:port` of the node.
    pub address: String,
    pub capabilities: Capabilities,
    /// Derived from `capabilities`; used for quota accounting.
    pub node_class: NodeClass,
    pub state: NodeState,
    /// Set on every transition into `Reserved`, cleared otherwise.
    pub reserved_at: Option<Instant>,
    /// Stamped on every transition into `Reserved`, unique per
    /// reservation. A holder settles only the reservation it was handed.
    pub reservation: Option<u64>,
    /// Session confirmed on this reservation, if any. A reserved node with
    /// a session is "busy"; without one it is still awaiting creation.
    pub session_id: Option<String>,
    /// Registration order.
    seq: u64,
}

impl Node {
    fn new(address: &str, capabilities: Capabilities, seq: u64) -> Self {
        Self {
            address: address.to_string(),
            node_class: capabilities.node_class(),
            capabilities,
            state: NodeState::Free,
            reserved_at: None,
            reservation: None,
            session_id: None,
            seq,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state == NodeState::Reserved && self.session_id.is_some()
    }

    /// Still the reservation `held` was taken from.
    fn holds(&self, held: &Node) -> bool {
        self.state == NodeState::Reserved
            && held.reservation.is_some()
            && self.reservation == held.reservation
    }
}

/// Outcome of a registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First time this address is seen.
    Added,
    /// Known free node; capabilities replaced.
    Refreshed,
    /// Known reserved node; capabilities kept until it is free again.
    Busy,
}

impl Registration {
    pub fn is_new(&self) -> bool {
        *self == Registration::Added
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.address, self.node_class, self.state.as_str())
    }
}

/// Point-in-time copy of every node, in registration order.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    nodes: Vec<Node>,
}

impl RegistrySnapshot {
    pub fn new(nodes: Vec<Node>) -> Self {
        let mut nodes = nodes;
        nodes.sort_by_key(|n| n.seq);
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Free nodes matching `predicate`, in registration order.
    pub fn list_free<'a>(
        &'a self,
        predicate: impl Fn(&Node) -> bool + 'a,
    ) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .iter()
            .filter(move |n| n.state == NodeState::Free && predicate(n))
    }

    /// Number of nodes of `class` currently reserved.
    pub fn reserved_count(&self, class: NodeClass) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.node_class == class && n.state == NodeState::Reserved)
            .count()
    }

    /// Total number of nodes of `class`.
    pub fn class_count(&self, class: NodeClass) -> usize {
        self.nodes.iter().filter(|n| n.node_class == class).count()
    }
}

struct RegistryInner {
    nodes: Vec<Node>,
    next_seq: u64,
    next_reservation: u64,
}

impl RegistryInner {
    fn held_index(&self, held: &Node) -> PoolResult<usize> {
        let idx = self
            .nodes
            .iter()
            .position(|n| n.address == held.address)
            .ok_or_else(|| PoolError::NodeNotFound(held.address.clone()))?;
        if !self.nodes[idx].holds(held) {
            return Err(PoolError::StaleReservation(held.address.clone()));
        }
        Ok(idx)
    }
}

/// Thread-safe node registry.
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                nodes: Vec::new(),
                next_seq: 0,
                next_reservation: 1,
            }),
        }
    }

    /// Add a node as `Free`, or refresh the capabilities of a known one.
    ///
    /// A known node keeps its state. A reserved node also keeps its
    /// capabilities and class, since quota accounting depends on them.
    pub fn register(&self, address: &str, capabilities: Capabilities) -> Registration {
        let mut inner = self.inner.write().expect("registry lock");
        if let Some(node) = inner.nodes.iter_mut().find(|n| n.address == address) {
            if node.state == NodeState::Reserved {
                debug!(%address, "node reserved, capability refresh skipped");
                return Registration::Busy;
            }
            node.node_class = capabilities.node_class();
            node.capabilities = capabilities;
            debug!(%address, "node capabilities refreshed");
            return Registration::Refreshed;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.nodes.push(Node::new(address, capabilities, seq));
        debug!(%address, "node registered");
        Registration::Added
    }

    /// Free nodes whose capabilities satisfy `predicate`. Never blocks on
    /// writers for longer than a single mutation.
    pub fn list_free(&self, predicate: impl Fn(&Node) -> bool) -> Vec<Node> {
        let inner = self.inner.read().expect("registry lock");
        inner
            .nodes
            .iter()
            .filter(|n| n.state == NodeState::Free && predicate(n))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read().expect("registry lock");
        RegistrySnapshot::new(inner.nodes.clone())
    }

    pub fn get(&self, address: &str) -> Option<Node> {
        let inner = self.inner.read().expect("registry lock");
        inner.nodes.iter().find(|n| n.address == address).cloned()
    }

    /// The reserved node currently holding `session_id`.
    pub fn find_by_session(&self, session_id: &str) -> Option<Node> {
        let inner = self.inner.read().expect("registry lock");
        inner
            .nodes
            .iter()
            .find(|n| n.session_id.as_deref() == Some(session_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock").nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compare-and-swap the state of a node.
    ///
    /// Fails with `StateMismatch` if the node is not currently in `from`.
    /// Transitioning to `Removed` detaches the node, as `remove` does.
    pub fn transition(&self, address: &str, from: NodeState, to: NodeState) -> PoolResult<Node> {
        let mut inner = self.inner.write().expect("registry lock");
        let idx = inner
            .nodes
            .iter()
            .position(|n| n.address == address)
            .ok_or_else(|| PoolError::NodeNotFound(address.to_string()))?;

        let actual = inner.nodes[idx].state;
        if actual != from {
            return Err(PoolError::StateMismatch {
                address: address.to_string(),
                expected: from,
                actual,
            });
        }

        if to == NodeState::Removed {
            let mut node = inner.nodes.remove(idx);
            node.state = NodeState::Removed;
            node.reserved_at = None;
            return Ok(node);
        }

        let reservation = if to == NodeState::Reserved {
            inner.next_reservation += 1;
            Some(inner.next_reservation - 1)
        } else {
            None
        };
        let node = &mut inner.nodes[idx];
        node.state = to;
        node.reservation = reservation;
        match to {
            NodeState::Reserved => node.reserved_at = Some(Instant::now()),
            _ => {
                node.reserved_at = None;
                node.session_id = None;
            }
        }
        Ok(node.clone())
    }

    /// Return the reservation `held` to `Free`.
    ///
    /// Fails with `StaleReservation` if the node has since been released,
    /// removed, or reserved again by someone else.
    pub fn release_held(&self, held: &Node) -> PoolResult<Node> {
        let mut inner = self.inner.write().expect("registry lock");
        let idx = inner.held_index(held)?;
        let node = &mut inner.nodes[idx];
        node.state = NodeState::Free;
        node.reserved_at = None;
        node.reservation = None;
        node.session_id = None;
        Ok(node.clone())
    }

    /// Remove the node behind the reservation `held`. `None` if that
    /// reservation is no longer current.
    pub fn remove_held(&self, held: &Node) -> Option<Node> {
        let mut inner = self.inner.write().expect("registry lock");
        let idx = inner.held_index(held).ok()?;
        let mut node = inner.nodes.remove(idx);
        node.state = NodeState::Removed;
        node.reserved_at = None;
        debug!(address = %held.address, "node removed from registry");
        Some(node)
    }

    /// Attach a confirmed session to the reservation `held`.
    pub fn bind_session(&self, held: &Node, session_id: &str) -> PoolResult<Node> {
        let mut inner = self.inner.write().expect("registry lock");
        let idx = inner.held_index(held)?;
        let node = &mut inner.nodes[idx];
        node.session_id = Some(session_id.to_string());
        Ok(node.clone())
    }

    /// Mark a node `Removed` and detach it. Idempotent: returns `None`
    /// if the node is already gone.
    pub fn remove(&self, address: &str) -> Option<Node> {
        let mut inner = self.inner.write().expect("registry lock");
        let idx = inner.nodes.iter().position(|n| n.address == address)?;
        let mut node = inner.nodes.remove(idx);
        node.state = NodeState::Removed;
        node.reserved_at = None;
        debug!(%address, "node removed from registry");
        Some(node)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
