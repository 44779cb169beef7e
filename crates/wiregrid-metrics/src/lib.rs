//! wiregrid-metrics — observability for the session grid.
//!
//! # Architecture
//!
//! ```text
//! GridMetrics
//!   ├── record_*() ← called from dispatch, sweep, and HTTP handlers
//!   └── snapshot() → MetricsSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for the metrics endpoint
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{GridMetrics, MetricsSnapshot, NodeCount};
pub use prometheus::render_prometheus;
