//! Reservation manager — the only component that mutates node state.
//!
//! Every mutating operation (`register`, `reserve`, `release`, `evict`,
//! `confirm`, `sweep_expired`) runs under one mutation lock, so the
//! per-class quota check and the `Free → Reserved` transition it guards
//! are atomic with respect to each other. Reads (`snapshot`, `list_free`)
//! go straight to the registry and never wait on the mutation lock.
//!
//! Operations on a reservation take the `Node` handed out by `reserve`
//! and only act while that exact reservation is still current.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use wiregrid_core::{Capabilities, GridSection};

use crate::error::{PoolError, PoolResult};
use crate::registry::{Node, NodeState, Registration, Registry, RegistrySnapshot};
use crate::strategy::StrategyEngine;

/// How many times `reserve` re-selects after losing a transition race.
pub const MAX_RESERVE_ATTEMPTS: usize = 3;

/// Upper bounds on how long a node may stay reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationDurations {
    /// Reservation with a confirmed session.
    pub busy: Duration,
    /// Reservation still waiting for its session to be created.
    pub reserved: Duration,
}

impl ReservationDurations {
    pub fn from_config(grid: &GridSection) -> Self {
        Self {
            busy: grid.busy_node_duration,
            reserved: grid.reserved_node_duration,
        }
    }

    /// Allowance that applies to `node` in its current state.
    pub fn allowance(&self, node: &Node) -> Duration {
        if node.session_id.is_some() {
            self.busy
        } else {
            self.reserved
        }
    }
}

pub struct ReservationManager {
    registry: Registry,
    strategy: StrategyEngine,
    durations: ReservationDurations,
    mutation: Mutex<()>,
}

impl ReservationManager {
    pub fn new(registry: Registry, strategy: StrategyEngine, durations: ReservationDurations) -> Self {
        Self {
            registry,
            strategy,
            durations,
            mutation: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn strategy(&self) -> &StrategyEngine {
        &self.strategy
    }

    pub fn durations(&self) -> ReservationDurations {
        self.durations
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    /// Add or refresh a node. A reserved node keeps its class until freed.
    pub fn register(&self, address: &str, capabilities: Capabilities) -> Registration {
        let _guard = self.mutation.lock().expect("mutation lock");
        self.registry.register(address, capabilities)
    }

    /// Reserve the best free node for `request`.
    pub fn reserve(&self, request: &Capabilities) -> PoolResult<Node> {
        self.reserve_excluding(request, &HashSet::new())
    }

    /// Reserve the best free node for `request` whose address is not in
    /// `excluded`.
    ///
    /// Fails with `NoCapacity` without touching any node when nothing is
    /// admissible, or when every attempt lost its transition race.
    pub fn reserve_excluding(
        &self,
        request: &Capabilities,
        excluded: &HashSet<String>,
    ) -> PoolResult<Node> {
        let _guard = self.mutation.lock().expect("mutation lock");
        for attempt in 1..=MAX_RESERVE_ATTEMPTS {
            let snapshot = self.registry.snapshot();
            let candidate = self.strategy.select_candidate_excluding(request, &snapshot, |n| {
                excluded.contains(&n.address)
            })?;
            match self
                .registry
                .transition(&candidate.address, NodeState::Free, NodeState::Reserved)
            {
                Ok(node) => {
                    debug!(node = %node.address, class = %node.node_class, attempt, "node reserved");
                    return Ok(node);
                }
                Err(PoolError::StateMismatch { .. } | PoolError::NodeNotFound(_)) => {
                    debug!(node = %candidate.address, attempt, "lost reservation race, reselecting");
                }
                Err(e) => return Err(e),
            }
        }
        Err(PoolError::NoCapacity)
    }

    /// Abandon a reservation that never produced a session.
    pub fn release(&self, held: &Node) -> PoolResult<Node> {
        let _guard = self.mutation.lock().expect("mutation lock");
        let node = self.registry.release_held(held)?;
        debug!(node = %held.address, "node released");
        Ok(node)
    }

    /// Remove a node found to be non-functional, whatever its state.
    /// Never reversible. Returns `None` if the node was already gone.
    pub fn evict(&self, address: &str) -> Option<Node> {
        let _guard = self.mutation.lock().expect("mutation lock");
        self.registry.remove(address)
    }

    /// Remove the node behind `held`, unless that reservation has already
    /// been settled, swept, or superseded.
    pub fn evict_held(&self, held: &Node) -> Option<Node> {
        let _guard = self.mutation.lock().expect("mutation lock");
        self.registry.remove_held(held)
    }

    /// Mark a reservation as carrying a live session.
    pub fn confirm(&self, held: &Node, session_id: &str) -> PoolResult<Node> {
        let _guard = self.mutation.lock().expect("mutation lock");
        self.registry.bind_session(held, session_id)
    }

    /// End a session: its node goes back to `Free`.
    pub fn release_session(&self, session_id: &str) -> PoolResult<Node> {
        let _guard = self.mutation.lock().expect("mutation lock");
        let node = self
            .registry
            .find_by_session(session_id)
            .ok_or_else(|| PoolError::SessionNotFound(session_id.to_string()))?;
        self.registry
            .transition(&node.address, NodeState::Reserved, NodeState::Free)
    }

    /// Evict every reserved node whose reservation outlived its allowance.
    pub fn sweep_expired(&self) -> Vec<Node> {
        let _guard = self.mutation.lock().expect("mutation lock");
        let now = Instant::now();
        let mut evicted = Vec::new();
        for node in self.registry.snapshot().nodes() {
            let Some(reserved_at) = node.reserved_at else {
                continue;
            };
            if node.state != NodeState::Reserved {
                continue;
            }
            let age = now.saturating_duration_since(reserved_at);
            let allowance = self.durations.allowance(node);
            if age > allowance {
                if let Some(removed) = self.registry.remove(&node.address) {
                    warn!(
                        node = %node.address,
                        busy = node.session_id.is_some(),
                        age_secs = age.as_secs(),
                        allowance_secs = allowance.as_secs(),
                        "reservation expired, node evicted"
                    );
                    evicted.push(removed);
                }
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use wiregrid_core::{NodeClass, Strategy};

    fn durations() -> ReservationDurations {
        ReservationDurations {
            busy: Duration::from_secs(600),
            reserved: Duration::from_secs(60),
        }
    }

    fn manager(strategies: &[Strategy]) -> ReservationManager {
        ReservationManager::new(Registry::new(), StrategyEngine::new(strategies), durations())
    }

    fn wda() -> Capabilities {
        Capabilities::new().with("platformName", "WDA")
    }

    #[test]
    fn reserve_single_default_node() {
        let mgr = manager(&[]);
        mgr.registry().register("a:1", Capabilities::new());

        let node = mgr.reserve(&Capabilities::new()).unwrap();
        assert_eq!(node.address, "a:1");
        assert_eq!(mgr.registry().get("a:1").unwrap().state, NodeState::Reserved);
    }

    #[test]
    fn zero_limit_fails_without_mutating_state() {
        let mgr = manager(&[Strategy {
            node_class: NodeClass::Wda,
            limit: 0,
        }]);
        mgr.registry().register("w:1", wda());

        assert!(matches!(mgr.reserve(&wda()), Err(PoolError::NoCapacity)));
        let node = mgr.registry().get("w:1").unwrap();
        assert_eq!(node.state, NodeState::Free);
        assert!(node.reserved_at.is_none());
    }

    #[test]
    fn exhausted_pool_reports_no_capacity() {
        let mgr = manager(&[]);
        mgr.registry().register("a:1", Capabilities::new());
        mgr.reserve(&Capabilities::new()).unwrap();

        assert!(matches!(
            mgr.reserve(&Capabilities::new()),
            Err(PoolError::NoCapacity)
        ));
    }

    #[test]
    fn excluded_addresses_are_never_offered() {
        let mgr = manager(&[]);
        mgr.registry().register("a:1", Capabilities::new());
        mgr.registry().register("b:1", Capabilities::new());

        let excluded: HashSet<String> = ["a:1".to_string()].into();
        let node = mgr.reserve_excluding(&Capabilities::new(), &excluded).unwrap();
        assert_eq!(node.address, "b:1");
        assert!(matches!(
            mgr.reserve_excluding(&Capabilities::new(), &excluded),
            Err(PoolError::NoCapacity)
        ));
    }

    #[test]
    fn release_returns_node_to_pool() {
        let mgr = manager(&[]);
        mgr.registry().register("a:1", Capabilities::new());
        let held = mgr.reserve(&Capabilities::new()).unwrap();

        let node = mgr.release(&held).unwrap();
        assert_eq!(node.state, NodeState::Free);
        assert!(mgr.reserve(&Capabilities::new()).is_ok());
    }

    #[test]
    fn release_of_free_node_is_stale() {
        let mgr = manager(&[]);
        mgr.registry().register("a:1", Capabilities::new());
        let free = mgr.registry().get("a:1").unwrap();
        assert!(matches!(
            mgr.release(&free),
            Err(PoolError::StaleReservation(_))
        ));
    }

    #[test]
    fn reregister_cannot_move_a_reserved_node_into_a_full_class() {
        let mgr = manager(&[Strategy {
            node_class: NodeClass::Wda,
            limit: 1,
        }]);
        mgr.register("w:1", wda());
        mgr.register("d:1", Capabilities::new());
        mgr.reserve(&wda()).unwrap();
        mgr.reserve(&Capabilities::new()).unwrap();

        assert_eq!(mgr.register("d:1", wda()), Registration::Busy);

        let snapshot = mgr.snapshot();
        assert_eq!(snapshot.reserved_count(NodeClass::Wda), 1);
        assert_eq!(snapshot.reserved_count(NodeClass::Default), 1);
        assert_eq!(
            mgr.registry().get("d:1").unwrap().node_class,
            NodeClass::Default
        );
    }

    #[test]
    fn refresh_applies_once_the_node_is_free() {
        let mgr = manager(&[]);
        mgr.register("d:1", Capabilities::new());
        let held = mgr.reserve(&Capabilities::new()).unwrap();
        mgr.release(&held).unwrap();

        assert_eq!(mgr.register("d:1", wda()), Registration::Refreshed);
        assert_eq!(mgr.registry().get("d:1").unwrap().node_class, NodeClass::Wda);
    }

    #[test]
    fn evict_removes_from_any_state() {
        let mgr = manager(&[]);
        mgr.registry().register("a:1", Capabilities::new());
        mgr.registry().register("b:1", Capabilities::new());
        mgr.reserve(&Capabilities::new()).unwrap();

        assert_eq!(mgr.evict("a:1").unwrap().state, NodeState::Removed);
        assert_eq!(mgr.evict("b:1").unwrap().state, NodeState::Removed);
        assert!(mgr.evict("b:1").is_none());
        assert!(mgr.registry().is_empty());
    }

    #[test]
    fn release_session_frees_the_bound_node() {
        let mgr = manager(&[]);
        mgr.registry().register("a:1", Capabilities::new());
        let held = mgr.reserve(&Capabilities::new()).unwrap();
        mgr.confirm(&held, "sess-1").unwrap();

        let node = mgr.release_session("sess-1").unwrap();
        assert_eq!(node.address, "a:1");
        assert_eq!(node.state, NodeState::Free);
        assert!(matches!(
            mgr.release_session("sess-1"),
            Err(PoolError::SessionNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_unconfirmed_reservation_after_reserved_duration() {
        let mgr = manager(&[]);
        mgr.registry().register("a:1", Capabilities::new());
        mgr.reserve(&Capabilities::new()).unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(mgr.sweep_expired().is_empty());
        assert_eq!(mgr.registry().get("a:1").unwrap().state, NodeState::Reserved);

        tokio::time::advance(Duration::from_secs(2)).await;
        let evicted = mgr.sweep_expired();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].state, NodeState::Removed);
        assert!(mgr.registry().get("a:1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_gives_busy_nodes_the_busy_allowance() {
        let mgr = manager(&[]);
        mgr.registry().register("a:1", Capabilities::new());
        let held = mgr.reserve(&Capabilities::new()).unwrap();
        mgr.confirm(&held, "sess-1").unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(mgr.sweep_expired().is_empty());

        tokio::time::advance(Duration::from_secs(500)).await;
        let evicted = mgr.sweep_expired();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].session_id.as_deref(), Some("sess-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_ignores_free_nodes() {
        let mgr = manager(&[]);
        mgr.registry().register("a:1", Capabilities::new());

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(mgr.sweep_expired().is_empty());
        assert_eq!(mgr.registry().len(), 1);
    }

    #[test]
    fn concurrent_reservations_respect_class_limit() {
        let mgr = Arc::new(manager(&[Strategy {
            node_class: NodeClass::Wda,
            limit: 3,
        }]));
        for i in 0..10 {
            mgr.registry().register(&format!("w:{i}"), wda());
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                thread::spawn(move || {
                    let mut won = Vec::new();
                    for _ in 0..20 {
                        if let Ok(node) = mgr.reserve(&wda()) {
                            let reserved = mgr.snapshot().reserved_count(NodeClass::Wda);
                            assert!(reserved <= 3, "quota exceeded: {reserved}");
                            won.push(node.address);
                        }
                    }
                    won
                })
            })
            .collect();

        let mut all: Vec<String> = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        // No release happens, so exactly `limit` distinct nodes are handed out.
        assert_eq!(all.len(), 3);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 3);
        assert_eq!(mgr.snapshot().reserved_count(NodeClass::Wda), 3);
    }
}
