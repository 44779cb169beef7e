//! wiregrid-pool — the node pool behind session dispatch.
//!
//! Holds every known automation node, decides which free node a
//! capabilities request may claim, and hands out exclusive reservations.
//!
//! # Architecture
//!
//! ```text
//! NodePool (registry + storage + metrics, cheap to clone)
//!   ├── ReservationManager  (only mutator of node state, one mutation lock)
//!   │   ├── Registry        (in-memory nodes, compare-and-swap transitions)
//!   │   └── StrategyEngine  (capability match + per-class quota)
//!   ├── StateStore          (node records, session affinity)
//!   └── Reservation         (drop guard: releases or evicts on abandon)
//! ```
//!
//! # Node lifecycle
//!
//! `Free → Reserved → Free` for a normal session, `any → Removed` when a
//! node fails or its reservation outlives the configured allowance.
//! Removed nodes are deleted from the registry, never recycled; a node
//! that comes back must register again.

pub mod error;
pub mod guard;
pub mod pool;
pub mod registry;
pub mod reservation;
pub mod strategy;

pub use error::{PoolError, PoolResult};
pub use guard::Reservation;
pub use pool::{EvictReason, NodePool};
pub use registry::{Node, NodeState, Registration, Registry, RegistrySnapshot};
pub use reservation::{ReservationDurations, ReservationManager};
pub use strategy::StrategyEngine;
