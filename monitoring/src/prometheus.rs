//! Prometheus text format exporter for transport metrics.
//!
//! Encodes a [`MetricsSnapshot`] into the [Prometheus exposition format](https://prometheus.io/docs/instrumenting/exposition_formats/)
//! (text/plain; version=0.0.4).
//!
//! ## Usage
//!
//! ```rust
//! use trv1_monitoring::{prometheus, TransportMetrics};
//!
//! let metrics = TransportMetrics::new();
//! metrics.messages_delivered.add(42);
//!
//! let text = prometheus::encode(&metrics.snapshot());
//! assert!(text.contains("fec_messages_delivered_total 42"));
//! ```

use crate::MetricsSnapshot;

/// Encode a metrics snapshot into Prometheus text exposition format.
pub fn encode(snap: &MetricsSnapshot) -> String {
    let mut out = String::with_capacity(4096);

    for counter in &snap.counters {
        write_counter(&mut out, counter.name, counter.help, counter.value);
    }
    for gauge in &snap.gauges {
        write_gauge(&mut out, gauge.name, gauge.help, gauge.value);
    }
    for histogram in &snap.histograms {
        write_histogram(
            &mut out,
            histogram.name,
            histogram.help,
            &histogram.buckets,
            histogram.sum,
            histogram.count,
        );
    }

    out
}

// ---------------------------------------------------------------------------
// Helper writers
// ---------------------------------------------------------------------------

fn write_counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} counter\n"));
    out.push_str(&format!("{name} {value}\n\n"));
}

fn write_gauge(out: &mut String, name: &str, help: &str, value: i64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    out.push_str(&format!("{name} {value}\n\n"));
}

fn write_histogram(
    out: &mut String,
    name: &str,
    help: &str,
    buckets: &[(f64, u64)],
    sum: f64,
    count: u64,
) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} histogram\n"));

    for (bound, cumulative_count) in buckets.iter().filter(|(b, _)| b.is_finite()) {
        out.push_str(&format!("{name}_bucket{{le=\"{bound}\"}} {cumulative_count}\n"));
    }
    out.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {count}\n"));
    out.push_str(&format!("{name}_sum {sum}\n"));
    out.push_str(&format!("{name}_count {count}\n\n"));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
