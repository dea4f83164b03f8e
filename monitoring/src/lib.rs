//! # TRv1 Monitoring
//!
//! Metrics for the erasure-coded datagram transport.
//!
//! Provides three metric types matching Prometheus conventions:
//! - **Counter**: monotonically increasing value (e.g., datagrams received)
//! - **Gauge**: value that can go up or down (e.g., bundles in flight)
//! - **Histogram**: distribution of observations (e.g., reassembly time)
//!
//! A [`TransportMetrics`] instance is created by the owner of a transport
//! endpoint and handed to it behind an `Arc`; nothing in this crate is
//! process-global.
//!
//! ## Usage
//!
//! ```rust
//! use trv1_monitoring::TransportMetrics;
//!
//! let metrics = TransportMetrics::new();
//!
//! metrics.datagrams_received.inc();
//! metrics.bundles_in_flight.set(3);
//! metrics.reassembly_time_ms.observe(12.0);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.counter("fec_datagrams_received_total"), Some(1));
//! let prom_text = trv1_monitoring::prometheus::encode(&snapshot);
//! assert!(prom_text.contains("fec_bundles_in_flight 3"));
//! ```

pub mod prometheus;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Metric primitives
// ---------------------------------------------------------------------------

/// A monotonically increasing counter.
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    /// Increment the counter by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a value to the counter.
    pub fn add(&self, v: u64) {
        self.value.fetch_add(v, Ordering::Relaxed);
    }

    /// Get the current counter value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn sample(&self) -> CounterSample {
        CounterSample {
            name: self.name,
            help: self.help,
            value: self.get(),
        }
    }
}

/// A gauge that can go up or down.
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    /// Set the gauge to an absolute value.
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Get the current gauge value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    fn sample(&self) -> GaugeSample {
        GaugeSample {
            name: self.name,
            help: self.help,
            value: self.get(),
        }
    }
}

/// A histogram that collects observations into cumulative buckets.
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum: Mutex<f64>,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Histogram {
    /// Create a histogram with the given bucket upper bounds.
    pub fn new(name: &'static str, help: &'static str, buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum: Mutex::new(0.0),
            count: AtomicU64::new(0),
            name,
            help,
        }
    }

    /// Observe a value, adding it to every bucket whose bound it does not exceed.
    pub fn observe(&self, v: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        *self.sum.lock() += v;
        for (bound, count) in self.buckets.iter().zip(&self.counts) {
            if v <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        *self.sum.lock()
    }

    /// `(upper bound, cumulative count)` pairs in bucket order.
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        self.buckets
            .iter()
            .zip(self.counts.iter())
            .map(|(bound, count)| (*bound, count.load(Ordering::Relaxed)))
            .collect()
    }

    fn sample(&self) -> HistogramSample {
        HistogramSample {
            name: self.name,
            help: self.help,
            buckets: self.get_buckets(),
            sum: self.get_sum(),
            count: self.get_count(),
        }
    }
}

/// Default buckets for reassembly timing (milliseconds). Bundles older than
/// the latency budget are evicted, so the interesting range is short.
pub fn default_time_buckets() -> Vec<f64> {
    vec![1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
}

// ---------------------------------------------------------------------------
// Transport metrics
// ---------------------------------------------------------------------------

/// Every observable outcome of one transport endpoint.
///
/// Partial reception is expected on a lossy network, so checksum failures,
/// decode failures and evictions show up here rather than as errors.
pub struct TransportMetrics {
    // -- Socket --
    pub datagrams_received: Counter,
    pub datagrams_sent: Counter,
    pub send_failures: Counter,
    pub read_errors: Counter,

    // -- Integrity --
    pub checksum_failures: Counter,
    pub malformed_fragments: Counter,

    // -- Reassembly --
    pub fragments_accepted: Counter,
    pub fragments_dropped: Counter,
    pub duplicate_fragments: Counter,
    pub late_fragments: Counter,
    pub bundles_created: Counter,
    pub bundles_evicted: Counter,
    pub bundles_rejected: Counter,
    pub decode_failures: Counter,
    pub bundles_in_flight: Gauge,
    pub reassembly_time_ms: Histogram,

    // -- Delivery --
    pub messages_sent: Counter,
    pub messages_completed: Counter,
    pub messages_delivered: Counter,
}

impl TransportMetrics {
    /// Create a new metrics instance with all values at zero.
    pub fn new() -> Self {
        Self {
            datagrams_received: Counter::new(
                "fec_datagrams_received_total",
                "Datagrams read from the socket",
            ),
            datagrams_sent: Counter::new(
                "fec_datagrams_sent_total",
                "Shard datagrams handed to the socket",
            ),
            send_failures: Counter::new(
                "fec_send_failures_total",
                "Shard datagrams the socket refused to send",
            ),
            read_errors: Counter::new(
                "fec_read_errors_total",
                "Transient socket read errors",
            ),
            checksum_failures: Counter::new(
                "fec_checksum_failures_total",
                "Datagrams dropped because the checksum trailer did not match",
            ),
            malformed_fragments: Counter::new(
                "fec_malformed_fragments_total",
                "Fragments dropped for a bad header or shard index",
            ),
            fragments_accepted: Counter::new(
                "fec_fragments_accepted_total",
                "Fragments stored in a reassembly bundle",
            ),
            fragments_dropped: Counter::new(
                "fec_fragments_dropped_total",
                "Fragments dropped because the bundler queue was full",
            ),
            duplicate_fragments: Counter::new(
                "fec_duplicate_fragments_total",
                "Fragments that overwrote an already filled shard slot",
            ),
            late_fragments: Counter::new(
                "fec_late_fragments_total",
                "Fragments for a bundle that already completed or expired",
            ),
            bundles_created: Counter::new(
                "fec_bundles_created_total",
                "Reassembly bundles opened",
            ),
            bundles_evicted: Counter::new(
                "fec_bundles_evicted_total",
                "Bundles discarded after exceeding the latency budget",
            ),
            bundles_rejected: Counter::new(
                "fec_bundles_rejected_total",
                "New bundles refused because the bundle store was full",
            ),
            decode_failures: Counter::new(
                "fec_decode_failures_total",
                "Reconstruction attempts that failed with enough shards present",
            ),
            bundles_in_flight: Gauge::new(
                "fec_bundles_in_flight",
                "Bundles currently collecting shards",
            ),
            reassembly_time_ms: Histogram::new(
                "fec_reassembly_time_ms",
                "Time from first fragment to completed message in milliseconds",
                default_time_buckets(),
            ),
            messages_sent: Counter::new(
                "fec_messages_sent_total",
                "Messages fragmented and transmitted",
            ),
            messages_completed: Counter::new(
                "fec_messages_completed_total",
                "Messages reconstructed from their shards",
            ),
            messages_delivered: Counter::new(
                "fec_messages_delivered_total",
                "Messages handed to the endpoint handler",
            ),
        }
    }

    fn counters(&self) -> [&Counter; 17] {
        [
            &self.datagrams_received,
            &self.datagrams_sent,
            &self.send_failures,
            &self.read_errors,
            &self.checksum_failures,
            &self.malformed_fragments,
            &self.fragments_accepted,
            &self.fragments_dropped,
            &self.duplicate_fragments,
            &self.late_fragments,
            &self.bundles_created,
            &self.bundles_evicted,
            &self.bundles_rejected,
            &self.decode_failures,
            &self.messages_sent,
            &self.messages_completed,
            &self.messages_delivered,
        ]
    }

    /// Take a point-in-time snapshot of all metrics for export.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters().iter().map(|c| c.sample()).collect(),
            gauges: vec![self.bundles_in_flight.sample()],
            histograms: vec![self.reassembly_time_ms.sample()],
        }
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Snapshot (point-in-time export)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CounterSample {
    pub name: &'static str,
    pub help: &'static str,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSample {
    pub name: &'static str,
    pub help: &'static str,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSample {
    pub name: &'static str,
    pub help: &'static str,
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

/// A point-in-time copy of a [`TransportMetrics`].
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub counters: Vec<CounterSample>,
    pub gauges: Vec<GaugeSample>,
    pub histograms: Vec<HistogramSample>,
}

impl MetricsSnapshot {
    /// Look up a counter value by its exported name.
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }

    /// Look up a gauge value by its exported name.
    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.gauges.iter().find(|g| g.name == name).map(|g| g.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let c = Counter::new("test", "test counter");
        assert_eq!(c.get(), 0);
        c.inc();
        c.inc();
        assert_eq!(c.get(), 2);
        let sample = c.sample();
        assert_eq!((sample.name, sample.help, sample.value), ("test", "test counter", 2));
    }

    #[test]
    fn test_gauge() {
        let g = Gauge::new("test", "test gauge");
        g.set(42);
        assert_eq!(g.get(), 42);
        g.set(-3);
        assert_eq!(g.get(), -3);
        assert_eq!(g.sample().value, -3);
    }

    #[test]
    fn test_histogram() {
        let h = Histogram::new("test", "test histogram", vec![10.0, 50.0, 100.0]);
        h.observe(5.0);
        h.observe(25.0);
        h.observe(75.0);
        h.observe(150.0);

        assert_eq!(h.get_count(), 4);
        assert!((h.get_sum() - 255.0).abs() < 1e-6);

        let buckets = h.get_buckets();
        assert_eq!(buckets[0], (10.0, 1));
        assert_eq!(buckets[1], (50.0, 2));
        assert_eq!(buckets[2], (100.0, 3));
    }

    #[test]
    fn test_snapshot_lookup() {
        let m = TransportMetrics::new();
        m.checksum_failures.add(3);
        m.bundles_evicted.inc();
        m.bundles_in_flight.set(7);

        let snap = m.snapshot();
        assert_eq!(snap.counter("fec_checksum_failures_total"), Some(3));
        assert_eq!(snap.counter("fec_bundles_evicted_total"), Some(1));
        assert_eq!(snap.counter("fec_messages_delivered_total"), Some(0));
        assert_eq!(snap.gauge("fec_bundles_in_flight"), Some(7));
        assert_eq!(snap.counter("no_such_metric"), None);
    }

    #[test]
    fn test_snapshot_names_are_unique() {
        let snap = TransportMetrics::new().snapshot();
        assert_eq!(snap.counters.len(), 17);
        for (i, a) in snap.counters.iter().enumerate() {
            for b in &snap.counters[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }
}
