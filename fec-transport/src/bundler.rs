//! Reassembly of fragments into messages.
//!
//! A [`Bundler`] owns every partially received message, keyed by
//! `(sender, logical_id)`. It runs as a single task fed by the receive loop,
//! so the store needs no locking.
//!
//! ```text
//!  absent ──first fragment──▶ collecting ──≥K shards, decoded──▶ completed
//!                                 │                                   │
//!                                 └──older than latency budget──▶ evicted
//!                                                                     │
//!                  retired for one latency budget, stragglers are late ◀┘
//! ```

use {
    crate::{
        config::TransportConfig,
        erasure::ErasureCodec,
        error::{Result, TransportError},
        fragment::{Fragment, SenderId},
        message::Message,
    },
    log::{debug, info, trace},
    std::{
        collections::HashMap,
        sync::Arc,
        time::{Duration, Instant},
    },
    tokio::{
        sync::mpsc,
        time::{interval, MissedTickBehavior},
    },
    tokio_util::sync::CancellationToken,
    trv1_monitoring::TransportMetrics,
};

/// Identifies the fragments of one logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleKey {
    pub sender: SenderId,
    pub logical_id: u32,
}

/// A message that is still being collected.
struct Bundle {
    /// One slot per shard index.
    shards: Vec<Option<Vec<u8>>>,
    /// Number of occupied slots.
    present: usize,
    first_seen_at: Instant,
}

impl Bundle {
    fn new(total: usize, first_seen_at: Instant) -> Self {
        Self {
            shards: vec![None; total],
            present: 0,
            first_seen_at,
        }
    }

    fn is_expired(&self, now: Instant, budget: Duration) -> bool {
        now.saturating_duration_since(self.first_seen_at) > budget
    }
}

/// What happened to a fragment handed to [`Bundler::insert`].
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored; the message needs more shards (or did not decode yet).
    Collecting { present: usize },
    /// The fragment completed its message.
    Completed(Message),
    /// The message already completed or was evicted.
    Late,
    /// Invalid shard index, or the store is full.
    Rejected,
}

pub struct Bundler {
    label: String,
    codec: Arc<ErasureCodec>,
    latency_budget: Duration,
    max_in_flight: usize,
    bundles: HashMap<BundleKey, Bundle>,
    /// Keys whose bundle completed or was evicted, with the time it happened.
    retired: HashMap<BundleKey, Instant>,
    metrics: Arc<TransportMetrics>,
}

impl Bundler {
    /// `label` prefixes every log line, usually the endpoint's local address.
    pub fn new(
        label: impl Into<String>,
        codec: Arc<ErasureCodec>,
        config: &TransportConfig,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            label: label.into(),
            codec,
            latency_budget: config.latency_budget(),
            max_in_flight: config.max_in_flight_bundles,
            bundles: HashMap::new(),
            retired: HashMap::new(),
            metrics,
        }
    }

    /// Messages currently being collected.
    pub fn in_flight(&self) -> usize {
        self.bundles.len()
    }

    /// Add a fragment received at `now`.
    pub fn insert(&mut self, fragment: Fragment, now: Instant) -> InsertOutcome {
        let index = usize::from(fragment.index);
        if index >= self.codec.total() {
            debug!(
                "{}: shard index {} out of range from {}",
                self.label, index, fragment.sender
            );
            self.metrics.malformed_fragments.inc();
            return InsertOutcome::Rejected;
        }

        let key = BundleKey {
            sender: fragment.sender,
            logical_id: fragment.logical_id,
        };
        if self.is_retired(&key, now) {
            trace!("{}: late shard {} for {:?}", self.label, index, key);
            self.metrics.late_fragments.inc();
            return InsertOutcome::Late;
        }

        let expired = self
            .bundles
            .get(&key)
            .is_some_and(|bundle| bundle.is_expired(now, self.latency_budget));
        if expired {
            self.evict(key, now);
            self.metrics.late_fragments.inc();
            return InsertOutcome::Late;
        }

        if !self.bundles.contains_key(&key) {
            if self.bundles.len() >= self.max_in_flight {
                self.evict_expired(now);
            }
            if self.bundles.len() >= self.max_in_flight {
                debug!(
                    "{}: {} bundles in flight, dropping {:?}",
                    self.label,
                    self.bundles.len(),
                    key
                );
                self.metrics.bundles_rejected.inc();
                return InsertOutcome::Rejected;
            }
            self.bundles
                .insert(key, Bundle::new(self.codec.total(), now));
            self.metrics.bundles_created.inc();
            self.update_gauge();
        }

        let Some(bundle) = self.bundles.get_mut(&key) else {
            return InsertOutcome::Rejected;
        };
        if bundle.shards[index].replace(fragment.shard).is_some() {
            self.metrics.duplicate_fragments.inc();
        } else {
            bundle.present += 1;
        }
        self.metrics.fragments_accepted.inc();

        let present = bundle.present;
        if present < self.codec.required() {
            return InsertOutcome::Collecting { present };
        }

        let first_seen_at = bundle.first_seen_at;
        match reassemble(&self.codec, &self.label, &bundle.shards) {
            Ok(payload) => {
                self.bundles.remove(&key);
                self.retired.insert(key, now);
                self.update_gauge();
                let message = Message {
                    logical_id: key.logical_id,
                    sender: key.sender,
                    first_seen_at,
                    completed_at: now,
                    payload,
                };
                self.metrics.messages_completed.inc();
                self.metrics
                    .reassembly_time_ms
                    .observe(message.reassembly_time().as_secs_f64() * 1_000.0);
                trace!(
                    "{}: completed {:?} with {} shards",
                    self.label,
                    key,
                    present
                );
                InsertOutcome::Completed(message)
            }
            Err(err) => {
                debug!("{}: cannot decode {:?}: {}", self.label, key, err);
                self.metrics.decode_failures.inc();
                InsertOutcome::Collecting { present }
            }
        }
    }

    /// Evict every bundle older than the latency budget and forget retired
    /// keys that have aged out. Returns the number of bundles evicted.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let budget = self.latency_budget;
        let expired: Vec<BundleKey> = self
            .bundles
            .iter()
            .filter(|(_, bundle)| bundle.is_expired(now, budget))
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.evict(*key, now);
        }
        self.retired
            .retain(|_, retired_at| now.saturating_duration_since(*retired_at) <= budget);
        expired.len()
    }

    fn evict(&mut self, key: BundleKey, now: Instant) {
        if let Some(bundle) = self.bundles.remove(&key) {
            debug!(
                "{}: evicting {:?} with {}/{} shards",
                self.label,
                key,
                bundle.present,
                self.codec.required()
            );
            self.retired.insert(key, now);
            self.metrics.bundles_evicted.inc();
            self.update_gauge();
        }
    }

    fn is_retired(&mut self, key: &BundleKey, now: Instant) -> bool {
        let Some(retired_at) = self.retired.get(key).copied() else {
            return false;
        };
        if now.saturating_duration_since(retired_at) <= self.latency_budget {
            return true;
        }
        self.retired.remove(key);
        false
    }

    fn update_gauge(&self) {
        self.metrics
            .bundles_in_flight
            .set(i64::try_from(self.bundles.len()).unwrap_or(i64::MAX));
    }

    /// Drive the bundler until `cancel` fires or the fragment queue closes.
    ///
    /// Completed messages are forwarded to `messages`; the periodic sweep
    /// runs every `eviction_interval`.
    pub async fn run(
        mut self,
        mut fragments: mpsc::Receiver<Fragment>,
        messages: mpsc::Sender<Message>,
        eviction_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut sweep = interval(eviction_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => {
                    let evicted = self.evict_expired(Instant::now());
                    if evicted > 0 {
                        trace!("{}: sweep evicted {} bundles", self.label, evicted);
                    }
                }
                fragment = fragments.recv() => {
                    let Some(fragment) = fragment else {
                        break;
                    };
                    let InsertOutcome::Completed(message) = self.insert(fragment, Instant::now())
                    else {
                        continue;
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = messages.send(message) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!(
            "{}: bundler stopped, discarding {} partial messages",
            self.label,
            self.bundles.len()
        );
        self.bundles.clear();
        self.update_gauge();
    }
}

/// Decode a bundle's shards into the payload.
///
/// When the present shards disagree in length, each length shared by at
/// least K shards is tried on its own, largest group first, with the other
/// slots treated as erased.
fn reassemble(codec: &ErasureCodec, label: &str, shards: &[Option<Vec<u8>>]) -> Result<Vec<u8>> {
    let mismatch = match codec.decode_payload(shards.to_vec()) {
        Err(err @ TransportError::ShardSizeMismatch { .. }) => err,
        result => return result,
    };

    let mut groups: HashMap<usize, usize> = HashMap::new();
    for shard in shards.iter().flatten() {
        *groups.entry(shard.len()).or_default() += 1;
    }
    let mut groups: Vec<(usize, usize)> = groups
        .into_iter()
        .filter(|(_, count)| *count >= codec.required())
        .collect();
    groups.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    for (len, count) in groups {
        let subset = shards
            .iter()
            .map(|shard| shard.as_ref().filter(|shard| shard.len() == len).cloned())
            .collect();
        match codec.decode_payload(subset) {
            Ok(payload) => return Ok(payload),
            Err(err) => trace!(
                "{}: {} shards of {} bytes do not decode: {}",
                label,
                count,
                len,
                err
            ),
        }
    }
    Err(mismatch)
}
