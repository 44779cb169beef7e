//! NodePool — reservation manager plus storage and metrics side effects.
//!
//! Registry mutations happen first, under the manager's lock; storage
//! writes follow once the lock is released so a slow disk never stalls
//! concurrent reservations. Storage failures are logged, not propagated:
//! the in-memory registry stays authoritative.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use wiregrid_core::{Capabilities, GridSection, NodeClass};
use wiregrid_metrics::{GridMetrics, NodeCount};
use wiregrid_state::{AffinityStore, StateStore};

use crate::error::PoolResult;
use crate::guard::Reservation;
use crate::registry::{Node, NodeState, Registration, Registry, RegistrySnapshot};
use crate::reservation::{ReservationDurations, ReservationManager};
use crate::strategy::StrategyEngine;

/// Why a node was removed from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// Pre-flight reset or session creation failed on the node.
    NodeFailure,
    /// Reservation outlived its allowance.
    Expired,
    /// The client went away while a call to the node was in flight.
    Cancelled,
}

impl EvictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictReason::NodeFailure => "node_failure",
            EvictReason::Expired => "expired",
            EvictReason::Cancelled => "cancelled",
        }
    }
}

struct PoolInner {
    manager: ReservationManager,
    store: StateStore,
    metrics: Arc<GridMetrics>,
}

/// Shared handle to the node pool. Cheap to clone.
#[derive(Clone)]
pub struct NodePool {
    inner: Arc<PoolInner>,
}

impl NodePool {
    pub fn new(manager: ReservationManager, store: StateStore, metrics: Arc<GridMetrics>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                manager,
                store,
                metrics,
            }),
        }
    }

    /// Build the pool from config, seeding it with persisted node records
    /// followed by the config's static nodes. Every node starts `Free`.
    pub fn from_config(
        grid: &GridSection,
        store: StateStore,
        metrics: Arc<GridMetrics>,
    ) -> PoolResult<Self> {
        let registry = Registry::new();
        for record in store.list_nodes()? {
            registry.register(&record.address, record.capabilities);
        }
        for node in &grid.nodes {
            registry.register(&node.address, node.capabilities.clone());
            store.register_node(&node.address, &node.capabilities)?;
        }
        info!(nodes = registry.len(), "node pool seeded");

        let manager = ReservationManager::new(
            registry,
            StrategyEngine::new(&grid.strategy_list),
            ReservationDurations::from_config(grid),
        );
        Ok(Self::new(manager, store, metrics))
    }

    pub fn manager(&self) -> &ReservationManager {
        &self.inner.manager
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub fn metrics(&self) -> &Arc<GridMetrics> {
        &self.inner.metrics
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.inner.manager.snapshot()
    }

    /// Register (or refresh) a node and persist its record.
    ///
    /// Returns true when the node is new. A reserved node keeps its
    /// current capabilities, in memory and on disk.
    pub fn register(&self, address: &str, capabilities: Capabilities) -> PoolResult<bool> {
        let registration = self
            .inner
            .manager
            .register(address, capabilities.clone());
        match registration {
            Registration::Added => info!(node = %address, "node joined pool"),
            Registration::Refreshed => debug!(node = %address, "node refreshed"),
            Registration::Busy => {
                debug!(node = %address, "node busy, registration refresh ignored");
                return Ok(false);
            }
        }
        self.inner.store.register_node(address, &capabilities)?;
        Ok(registration.is_new())
    }

    /// Reserve a node for `request`, skipping `excluded` addresses.
    pub fn reserve(
        &self,
        request: &Capabilities,
        excluded: &HashSet<String>,
    ) -> PoolResult<Reservation> {
        let node = self.inner.manager.reserve_excluding(request, excluded)?;
        Ok(Reservation::new(self.clone(), node))
    }

    pub(crate) fn release(&self, held: &Node) -> PoolResult<Node> {
        self.inner.manager.release(held)
    }

    /// Remove a node for good and drop its persisted records.
    pub fn evict(&self, address: &str, reason: EvictReason) -> Option<Node> {
        let node = self.inner.manager.evict(address)?;
        self.evicted(&node, reason);
        Some(node)
    }

    /// Like `evict`, but only while `held` is still the node's current
    /// reservation.
    pub(crate) fn evict_held(&self, held: &Node, reason: EvictReason) -> Option<Node> {
        let node = self.inner.manager.evict_held(held)?;
        self.evicted(&node, reason);
        Some(node)
    }

    /// Bind a created session to its node and publish the affinity record.
    pub(crate) fn confirm(&self, held: &Node, session_id: &str) -> PoolResult<Node> {
        let node = self.inner.manager.confirm(held, session_id)?;
        self.inner.metrics.record_session_created();
        if let Err(e) = self.inner.store.record_session_node(session_id, &node.address) {
            error!(%session_id, node = %node.address, error = %e, "failed to persist session affinity");
        }
        Ok(node)
    }

    fn evicted(&self, node: &Node, reason: EvictReason) {
        self.inner.metrics.record_eviction(reason.as_str());
        self.forget_node(&node.address);
        warn!(node = %node.address, reason = reason.as_str(), "node evicted");
    }

    /// Node address owning `session_id`, from the affinity records.
    pub fn lookup_session(&self, session_id: &str) -> PoolResult<Option<String>> {
        Ok(self.inner.store.lookup_node(session_id)?)
    }

    /// A client closed its session: free the node and drop the record.
    pub fn end_session(&self, session_id: &str) -> PoolResult<Node> {
        if let Err(e) = self.inner.store.forget_session(session_id) {
            error!(%session_id, error = %e, "failed to delete session affinity");
        }
        let node = self.inner.manager.release_session(session_id)?;
        self.inner.metrics.record_session_closed();
        info!(%session_id, node = %node.address, "session closed, node released");
        Ok(node)
    }

    /// Evict every expired reservation. Returns the evicted nodes.
    pub fn sweep(&self) -> Vec<Node> {
        let evicted = self.inner.manager.sweep_expired();
        for node in &evicted {
            self.inner
                .metrics
                .record_eviction(EvictReason::Expired.as_str());
            self.forget_node(&node.address);
        }
        evicted
    }

    /// Periodic sweep loop; exits when `shutdown` flips.
    pub async fn run_sweeper(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        info!(interval_secs = interval.as_secs(), "reservation sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.sweep();
                    if !evicted.is_empty() {
                        info!(count = evicted.len(), "swept expired reservations");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("reservation sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// Node gauges for the metrics endpoint.
    pub fn node_counts(&self) -> Vec<NodeCount> {
        let snapshot = self.snapshot();
        let mut counts = Vec::new();
        for class in NodeClass::ALL {
            for state in [NodeState::Free, NodeState::Reserved] {
                let count = snapshot
                    .nodes()
                    .iter()
                    .filter(|n| n.node_class == class && n.state == state)
                    .count();
                counts.push(NodeCount {
                    class: class.to_string(),
                    state: state.as_str().to_string(),
                    count: count as u64,
                });
            }
        }
        counts
    }

    fn forget_node(&self, address: &str) {
        match self.inner.store.forget_node(address) {
            Ok(sessions) if sessions > 0 => {
                debug!(node = %address, sessions, "dropped affinity records of evicted node");
            }
            Ok(_) => {}
            Err(e) => error!(node = %address, error = %e, "failed to delete node records"),
        }
    }
}
