//! Erasure-coded datagram transport.
//!
//! Messages are framed, split into `required` (K) data shards, extended with
//! `total - required` Reed-Solomon parity shards and sent as one UDP datagram
//! per shard. The receiver reassembles a message from any K intact shards of
//! it, so up to N-K datagrams per message may be lost without retransmission.
//!
//! ## Wire format
//!
//! ```text
//! [sender_id: 6][logical_id: u32-le][shard_index: u8][shard][checksum: 8]
//! ```
//!
//! The shard is a slice of the frame `[len: u16-le][payload][zero padding]`
//! or a parity shard over those slices. See [`fragment`] and [`framing`].
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`framing`]  | Length prefix and padding around the payload |
//! | [`checksum`] | Integrity trailer on every datagram |
//! | [`erasure`]  | Split, encode, reconstruct and join shards |
//! | [`fragment`] | Sender identity and datagram encode/parse |
//! | [`bundler`]  | Per-message reassembly with a latency budget |
//! | [`endpoint`] | Socket, task pipeline and `send` |
//! | [`config`]   | `TransportConfig` defaults and validation |
//! | [`message`]  | Delivered message type and handler alias |
//! | [`error`]    | Crate-wide error enum |

pub mod bundler;
pub mod checksum;
pub mod config;
pub mod endpoint;
pub mod erasure;
pub mod error;
pub mod fragment;
pub mod framing;
pub mod message;

pub use {
    config::TransportConfig,
    endpoint::Endpoint,
    error::{Result, TransportError},
    fragment::SenderId,
    message::{Message, MessageHandler},
    trv1_monitoring::TransportMetrics,
};
