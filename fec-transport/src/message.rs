//! Messages handed to the endpoint's handler.

use {
    crate::fragment::SenderId,
    std::{
        fmt,
        sync::Arc,
        time::{Duration, Instant},
    },
};

/// A logical message reassembled from at least `required` of its shards.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// Identifier the sender picked for this message.
    pub logical_id: u32,
    /// Identity stamped into the fragments by the sender.
    pub sender: SenderId,
    /// When the first fragment of the message arrived.
    pub first_seen_at: Instant,
    /// When enough fragments were present to decode it.
    pub completed_at: Instant,
    /// The payload as it was passed to `send`.
    pub payload: Vec<u8>,
}

impl Message {
    /// Time between the first fragment and successful reassembly.
    pub fn reassembly_time(&self) -> Duration {
        self.completed_at.saturating_duration_since(self.first_seen_at)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("logical_id", &self.logical_id)
            .field("sender", &self.sender)
            .field("payload_len", &self.payload.len())
            .field("reassembly_time", &self.reassembly_time())
            .finish()
    }
}

/// Callback invoked once per delivered message, from the delivery task.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;
