//! Admission strategies — which free node a request may claim.
//!
//! A node is offered when it is free, its declared capabilities satisfy
//! the request, and reserving it would keep its class under the class's
//! configured limit. Among admissible nodes the earliest registered wins;
//! there is no load-aware balancing beyond the quota rule.

use std::collections::HashMap;

use tracing::debug;

use wiregrid_core::{Capabilities, NodeClass, Strategy};

use crate::error::{PoolError, PoolResult};
use crate::registry::{Node, RegistrySnapshot};

/// Evaluates the configured strategy list against a registry snapshot.
#[derive(Debug, Clone, Default)]
pub struct StrategyEngine {
    limits: HashMap<NodeClass, u32>,
}

impl StrategyEngine {
    pub fn new(strategies: &[Strategy]) -> Self {
        let limits = strategies
            .iter()
            .map(|s| (s.node_class, s.limit))
            .collect();
        Self { limits }
    }

    /// Configured limit for a class. `None` means no ceiling beyond the
    /// number of nodes of that class.
    pub fn limit_for(&self, class: NodeClass) -> Option<u32> {
        self.limits.get(&class).copied()
    }

    /// Whether one more node of `class` may be reserved right now.
    pub fn admits(&self, class: NodeClass, snapshot: &RegistrySnapshot) -> bool {
        let reserved = snapshot.reserved_count(class);
        let limit = match self.limit_for(class) {
            Some(limit) => limit as usize,
            None => snapshot.class_count(class),
        };
        reserved < limit
    }

    /// The single best-fit free node for `request`, or `NoCapacity`.
    pub fn select_candidate(
        &self,
        request: &Capabilities,
        snapshot: &RegistrySnapshot,
    ) -> PoolResult<Node> {
        self.select_candidate_excluding(request, snapshot, |_| false)
    }

    /// Like [`select_candidate`](Self::select_candidate), skipping nodes
    /// for which `excluded` returns true.
    pub fn select_candidate_excluding(
        &self,
        request: &Capabilities,
        snapshot: &RegistrySnapshot,
        excluded: impl Fn(&Node) -> bool,
    ) -> PoolResult<Node> {
        let mut quota_blocked = false;
        for node in snapshot.list_free(|n| n.capabilities.satisfies(request) && !excluded(n)) {
            if self.admits(node.node_class, snapshot) {
                return Ok(node.clone());
            }
            quota_blocked = true;
        }
        if quota_blocked {
            debug!(?request, "matching nodes exist but their class is at its limit");
        }
        Err(PoolError::NoCapacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeState, Registry};

    fn wda() -> Capabilities {
        Capabilities::new().with("platformName", "WDA")
    }

    fn chrome() -> Capabilities {
        Capabilities::new().with("browserName", "chrome")
    }

    #[test]
    fn empty_request_takes_first_free_node() {
        let registry = Registry::new();
        registry.register("a:1", chrome());
        registry.register("b:1", chrome());

        let engine = StrategyEngine::default();
        let node = engine
            .select_candidate(&Capabilities::new(), &registry.snapshot())
            .unwrap();
        assert_eq!(node.address, "a:1");
    }

    #[test]
    fn selection_is_registration_ordered() {
        let registry = Registry::new();
        registry.register("c:1", chrome());
        registry.register("a:1", chrome());
        registry.register("b:1", chrome());
        registry
            .transition("c:1", NodeState::Free, NodeState::Reserved)
            .unwrap();

        let engine = StrategyEngine::default();
        for _ in 0..3 {
            let node = engine.select_candidate(&chrome(), &registry.snapshot()).unwrap();
            assert_eq!(node.address, "a:1");
        }
    }

    #[test]
    fn skips_nodes_that_do_not_match() {
        let registry = Registry::new();
        registry.register("ff:1", Capabilities::new().with("browserName", "firefox"));
        registry.register("ch:1", chrome());

        let engine = StrategyEngine::default();
        let node = engine.select_candidate(&chrome(), &registry.snapshot()).unwrap();
        assert_eq!(node.address, "ch:1");
    }

    #[test]
    fn zero_limit_blocks_class() {
        let registry = Registry::new();
        registry.register("w:1", wda());

        let engine = StrategyEngine::new(&[Strategy {
            node_class: NodeClass::Wda,
            limit: 0,
        }]);
        let result = engine.select_candidate(&wda(), &registry.snapshot());
        assert!(matches!(result, Err(PoolError::NoCapacity)));
    }

    #[test]
    fn quota_counts_only_reserved_nodes_of_class() {
        let registry = Registry::new();
        registry.register("w:1", wda());
        registry.register("w:2", wda());
        registry.register("d:1", chrome());
        registry
            .transition("d:1", NodeState::Free, NodeState::Reserved)
            .unwrap();

        let engine = StrategyEngine::new(&[Strategy {
            node_class: NodeClass::Wda,
            limit: 1,
        }]);
        // Reserved default node does not count against WDA.
        let first = engine.select_candidate(&wda(), &registry.snapshot()).unwrap();
        assert_eq!(first.address, "w:1");

        registry
            .transition("w:1", NodeState::Free, NodeState::Reserved)
            .unwrap();
        assert!(matches!(
            engine.select_candidate(&wda(), &registry.snapshot()),
            Err(PoolError::NoCapacity)
        ));
    }

    #[test]
    fn unconfigured_class_is_bounded_by_pool_size_only() {
        let registry = Registry::new();
        registry.register("a:1", chrome());
        registry.register("b:1", chrome());
        registry
            .transition("a:1", NodeState::Free, NodeState::Reserved)
            .unwrap();

        let engine = StrategyEngine::new(&[Strategy {
            node_class: NodeClass::Wda,
            limit: 0,
        }]);
        assert_eq!(engine.limit_for(NodeClass::Default), None);
        let node = engine.select_candidate(&chrome(), &registry.snapshot()).unwrap();
        assert_eq!(node.address, "b:1");
    }

    #[test]
    fn empty_pool_has_no_capacity() {
        let engine = StrategyEngine::default();
        assert!(matches!(
            engine.select_candidate(&Capabilities::new(), &RegistrySnapshot::default()),
            Err(PoolError::NoCapacity)
        ));
    }

    #[test]
    fn excluded_nodes_are_skipped() {
        let registry = Registry::new();
        registry.register("a:1", chrome());
        registry.register("b:1", chrome());

        let engine = StrategyEngine::default();
        let node = engine
            .select_candidate_excluding(&chrome(), &registry.snapshot(), |n| n.address == "a:1")
            .unwrap();
        assert_eq!(node.address, "b:1");
    }
}
