//! Prometheus text exposition format.

use std::fmt::Write;

use crate::collector::MetricsSnapshot;

/// Render a metrics snapshot into Prometheus text format.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    counter(
        &mut out,
        "wiregrid_sessions_created_total",
        "Sessions successfully created on a node.",
        snapshot.sessions_created,
    );
    counter(
        &mut out,
        "wiregrid_sessions_closed_total",
        "Sessions closed by clients.",
        snapshot.sessions_closed,
    );
    counter(
        &mut out,
        "wiregrid_capacity_rejections_total",
        "Create-session requests rejected for lack of an admissible node.",
        snapshot.capacity_rejections,
    );
    counter(
        &mut out,
        "wiregrid_cancelled_requests_total",
        "Create-session requests abandoned by the client.",
        snapshot.cancelled_requests,
    );
    counter(
        &mut out,
        "wiregrid_node_attempts_total",
        "Nodes tried while creating sessions, retries included.",
        snapshot.node_attempts,
    );

    out.push_str("# HELP wiregrid_node_evictions_total Nodes removed from the pool.\n");
    out.push_str("# TYPE wiregrid_node_evictions_total counter\n");
    for (reason, count) in &snapshot.evictions {
        let _ = writeln!(out, "wiregrid_node_evictions_total{{reason=\"{reason}\"}} {count}");
    }

    out.push_str("# HELP wiregrid_nodes Nodes in the pool by class and state.\n");
    out.push_str("# TYPE wiregrid_nodes gauge\n");
    for n in &snapshot.nodes {
        let _ = writeln!(
            out,
            "wiregrid_nodes{{class=\"{}\",state=\"{}\"}} {}",
            n.class, n.state, n.count
        );
    }

    out
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}
