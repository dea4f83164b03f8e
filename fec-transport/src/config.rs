//! Configuration for the erasure-coded datagram transport.

use {
    crate::{
        erasure::ErasureCodec,
        error::{Result, TransportError},
        fragment::{datagram_len, SenderId},
        framing::{framed_len, max_payload_len},
    },
    std::{
        net::{Ipv4Addr, SocketAddr, SocketAddrV4},
        time::Duration,
    },
};

/// Default UDP port the transport listens on.
pub const DEFAULT_PORT: u16 = 11047;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD_LEN: usize = 65_507;

/// Configuration for a transport [`Endpoint`](crate::endpoint::Endpoint).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Local address to bind the UDP socket on.
    /// Default: `0.0.0.0:11047`
    pub bind_addr: SocketAddr,

    /// Size of the receive buffer, i.e. the largest datagram that is read
    /// whole. Must hold the largest datagram `max_message_size` produces.
    pub buffer_size: usize,

    /// How long a partially received message is kept before it is evicted (ms).
    pub latency_budget_ms: u64,

    /// Shards needed to reconstruct a message (K).
    pub required_shards: usize,

    /// Shards sent per message, data plus parity (N).
    pub total_shards: usize,

    /// Largest payload accepted by `send`.
    pub max_message_size: usize,

    /// Depth of the fragment and message queues between tasks.
    pub channel_buffer_size: usize,

    /// Period of the bundler's expiry sweep (ms).
    pub eviction_interval_ms: u64,

    /// Upper bound on messages being reassembled at once.
    pub max_in_flight_bundles: usize,

    /// How long `stop` waits for the tasks before aborting them (ms).
    pub shutdown_grace_ms: u64,

    /// Identity stamped into outgoing fragments. Defaults to the bound
    /// address, which is meaningless to peers when bound to `0.0.0.0`.
    pub sender_id: Option<SenderId>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            buffer_size: 4_096,
            latency_budget_ms: 250,
            required_shards: 3,
            total_shards: 9,
            max_message_size: 3_072,
            channel_buffer_size: 128,
            eviction_interval_ms: 50,
            max_in_flight_bundles: 4_096,
            shutdown_grace_ms: 1_000,
            sender_id: None,
        }
    }
}

impl TransportConfig {
    /// Create a config suitable for local testing with shorter timers.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)),
            latency_budget_ms: 200,
            eviction_interval_ms: 20,
            max_in_flight_bundles: 256,
            shutdown_grace_ms: 500,
            ..Self::default()
        }
    }

    pub fn latency_budget(&self) -> Duration {
        Duration::from_millis(self.latency_budget_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Size of the datagram carrying one shard of a `max_message_size` payload.
    pub fn max_datagram_len(&self) -> usize {
        let framed = framed_len(
            self.max_message_size,
            self.required_shards,
            self.total_shards,
        );
        datagram_len(framed / self.required_shards.max(1))
    }

    /// Check the configuration for values the transport cannot run with.
    pub fn validate(&self) -> Result<()> {
        ErasureCodec::new(self.required_shards, self.total_shards)?;

        let non_zero = [
            ("buffer_size", self.buffer_size as u64),
            ("latency_budget_ms", self.latency_budget_ms),
            ("max_message_size", self.max_message_size as u64),
            ("channel_buffer_size", self.channel_buffer_size as u64),
            ("eviction_interval_ms", self.eviction_interval_ms),
            ("max_in_flight_bundles", self.max_in_flight_bundles as u64),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(TransportError::InvalidConfig(format!("{name} must be non-zero")));
        }

        let max_payload = max_payload_len(self.required_shards);
        if self.max_message_size > max_payload {
            return Err(TransportError::InvalidConfig(format!(
                "max_message_size {} exceeds {max_payload}, the most {} data shards can frame",
                self.max_message_size, self.required_shards,
            )));
        }

        let max_datagram = self.max_datagram_len();
        if max_datagram > MAX_UDP_PAYLOAD_LEN {
            return Err(TransportError::InvalidConfig(format!(
                "max_message_size {} needs {max_datagram} byte datagrams, more than UDP's \
                 {MAX_UDP_PAYLOAD_LEN}; raise required_shards or lower max_message_size",
                self.max_message_size,
            )));
        }
        if self.buffer_size < max_datagram {
            return Err(TransportError::InvalidConfig(format!(
                "buffer_size {} cannot hold {max_datagram} byte datagrams",
                self.buffer_size,
            )));
        }
        Ok(())
    }
}
