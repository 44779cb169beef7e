//! Grid counters.
//!
//! Lock-free atomics for the hot counters; eviction reasons go into a
//! small mutex-protected map since the set of reasons is open.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

/// Number of nodes in a given class and state, supplied by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCount {
    pub class: String,
    pub state: String,
    pub count: u64,
}

/// Point-in-time view of every metric.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub capacity_rejections: u64,
    pub cancelled_requests: u64,
    pub node_attempts: u64,
    pub evictions: BTreeMap<String, u64>,
    pub nodes: Vec<NodeCount>,
}

/// Process-wide grid counters.
#[derive(Debug, Default)]
pub struct GridMetrics {
    sessions_created: AtomicU64,
    sessions_closed: AtomicU64,
    capacity_rejections: AtomicU64,
    cancelled_requests: AtomicU64,
    node_attempts: AtomicU64,
    evictions: Mutex<BTreeMap<String, u64>>,
}

impl GridMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capacity_rejection(&self) {
        self.capacity_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// One node tried for one create-session request.
    pub fn record_node_attempt(&self) {
        self.node_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, reason: &str) {
        let mut evictions = self.evictions.lock().expect("evictions lock");
        *evictions.entry(reason.to_string()).or_insert(0) += 1;
        trace!(reason, "eviction recorded");
    }

    /// Snapshot the counters, attaching node gauges from the caller.
    pub fn snapshot(&self, nodes: Vec<NodeCount>) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            cancelled_requests: self.cancelled_requests.load(Ordering::Relaxed),
            node_attempts: self.node_attempts.load(Ordering::Relaxed),
            evictions: self.evictions.lock().expect("evictions lock").clone(),
            nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = GridMetrics::new();
        assert_eq!(metrics.snapshot(Vec::new()), MetricsSnapshot::default());
    }

    #[test]
    fn counters_accumulate() {
        let metrics = GridMetrics::new();
        metrics.record_session_created();
        metrics.record_session_created();
        metrics.record_session_closed();
        metrics.record_capacity_rejection();
        metrics.record_cancelled();
        metrics.record_node_attempt();
        metrics.record_node_attempt();
        metrics.record_node_attempt();
        metrics.record_eviction("node_failure");
        metrics.record_eviction("node_failure");
        metrics.record_eviction("expired");

        let snap = metrics.snapshot(Vec::new());
        assert_eq!(snap.sessions_created, 2);
        assert_eq!(snap.sessions_closed, 1);
        assert_eq!(snap.capacity_rejections, 1);
        assert_eq!(snap.cancelled_requests, 1);
        assert_eq!(snap.node_attempts, 3);
        assert_eq!(snap.evictions.get("node_failure"), Some(&2));
        assert_eq!(snap.evictions.get("expired"), Some(&1));
    }

    #[test]
    fn concurrent_recording_is_exact() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(GridMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        m.record_session_created();
                        m.record_eviction("expired");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = metrics.snapshot(Vec::new());
        assert_eq!(snap.sessions_created, 1000);
        assert_eq!(snap.evictions.get("expired"), Some(&1000));
    }
}
