//! Error types for the erasure-coded datagram transport.

use {std::net::SocketAddr, thiserror::Error};

/// Errors that can occur in the datagram transport.
///
/// Only configuration, bind, resolution and send errors ever reach a caller.
/// The integrity and decode variants are produced while processing inbound
/// fragments and end up as metrics, not as failures.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport configuration is inconsistent.
    #[error("invalid transport config: {0}")]
    InvalidConfig(String),

    /// Shard counts outside `0 < required <= total <= 256`.
    #[error("invalid erasure parameters: required {required}, total {total}")]
    InvalidCodecParams {
        /// Data shards (K).
        required: usize,
        /// Data plus parity shards (N).
        total: usize,
    },

    /// Nothing to send or frame.
    #[error("payload is empty")]
    EmptyPayload,

    /// Payload exceeds the maximum the caller may send or the frame can hold.
    #[error("payload too large: {size} bytes (max {max} bytes)")]
    PayloadTooLarge {
        /// Actual payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A frame is shorter than its length prefix claims.
    #[error("frame truncated: need {needed} bytes, got {actual}")]
    Truncated {
        /// Bytes the prefix requires.
        needed: usize,
        /// Bytes available.
        actual: usize,
    },

    /// The framed payload cannot be divided into equal data shards.
    #[error("frame of {len} bytes does not divide into {required} data shards")]
    MisalignedFrame {
        /// Framed length.
        len: usize,
        /// Data shards (K).
        required: usize,
    },

    /// Wrong number of shard slots handed to the codec.
    #[error("expected {expected} shard slots, got {actual}")]
    ShardCountMismatch {
        /// Slots the codec works with (N).
        expected: usize,
        /// Slots supplied.
        actual: usize,
    },

    /// Shards of one message disagree in length, or are empty.
    #[error("shard size mismatch: expected {expected} bytes, got {actual}")]
    ShardSizeMismatch {
        /// Length of the first present shard.
        expected: usize,
        /// Offending length.
        actual: usize,
    },

    /// Not enough shards to reconstruct.
    #[error("too few shards: {present} present, {required} required")]
    TooFewShards {
        /// Distinct shards present.
        present: usize,
        /// Data shards (K).
        required: usize,
    },

    /// The Reed-Solomon backend rejected the operation.
    #[error("erasure coding error: {0:?}")]
    Erasure(reed_solomon_erasure::Error),

    /// The checksum trailer does not match the datagram contents.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The datagram passed the checksum but is not a valid fragment.
    #[error("malformed fragment: {0}")]
    MalformedFragment(String),

    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested listen address.
        addr: SocketAddr,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// A destination address could not be resolved.
    #[error("cannot resolve destination {0}")]
    Resolve(String),

    /// Too many shard datagrams failed to leave the socket for the message to
    /// be recoverable on the other side.
    #[error("send failed: {failed} of {total} shards not sent ({required} needed)")]
    SendFailed {
        /// Shards the socket refused.
        failed: usize,
        /// Shards attempted (N).
        total: usize,
        /// Shards the receiver needs (K).
        required: usize,
    },

    /// The endpoint has been stopped.
    #[error("endpoint stopped")]
    Stopped,

    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
