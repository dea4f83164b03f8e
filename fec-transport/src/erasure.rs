//! Reed-Solomon erasure coding over framed payloads.
//!
//! A framed payload is split into `required` (K) data shards and extended
//! with `total - required` parity shards. Any K shards, identified by their
//! index, reconstruct the rest. Arithmetic is over GF(2^8), one symbol per
//! byte, so at most 256 shards exist per message.
//!
//! The code corrects erasures only. A shard that is present but wrong is not
//! detected here and silently produces wrong output, which is why the
//! transport verifies every fragment's checksum before it reaches a codec.

use {
    crate::{
        error::{Result, TransportError},
        framing,
    },
    reed_solomon_erasure::galois_8::ReedSolomon,
    std::fmt,
};

/// Largest total shard count GF(2^8) supports.
pub const MAX_TOTAL_SHARDS: usize = 256;

/// A K-of-N systematic erasure codec.
pub struct ErasureCodec {
    required: usize,
    total: usize,
    // None when total == required: there is no parity to compute.
    rs: Option<ReedSolomon>,
}

impl fmt::Debug for ErasureCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasureCodec")
            .field("required", &self.required)
            .field("total", &self.total)
            .finish()
    }
}

impl ErasureCodec {
    /// Create a codec needing `required` of `total` shards.
    ///
    /// Fails unless `0 < required <= total <= 256`.
    pub fn new(required: usize, total: usize) -> Result<Self> {
        if required == 0 || required > total || total > MAX_TOTAL_SHARDS {
            return Err(TransportError::InvalidCodecParams { required, total });
        }
        let parity = total - required;
        let rs = if parity == 0 {
            None
        } else {
            Some(ReedSolomon::new(required, parity).map_err(TransportError::Erasure)?)
        };
        Ok(Self {
            required,
            total,
            rs,
        })
    }

    /// Data shards (K).
    pub fn required(&self) -> usize {
        self.required
    }

    /// Data plus parity shards (N).
    pub fn total(&self) -> usize {
        self.total
    }

    /// Shard length used for a `payload_len`-byte payload.
    pub fn shard_len(&self, payload_len: usize) -> usize {
        framing::framed_len(payload_len, self.required, self.total) / self.required
    }

    /// Divide a framed payload into K data shards followed by N-K zeroed
    /// parity buffers of the same length.
    pub fn split(&self, framed: &[u8]) -> Result<Vec<Vec<u8>>> {
        if framed.is_empty() || framed.len() % self.required != 0 {
            return Err(TransportError::MisalignedFrame {
                len: framed.len(),
                required: self.required,
            });
        }
        let shard_len = framed.len() / self.required;
        let mut shards: Vec<Vec<u8>> = framed.chunks_exact(shard_len).map(<[u8]>::to_vec).collect();
        shards.resize(self.total, vec![0u8; shard_len]);
        Ok(shards)
    }

    /// Fill the parity shards from the data shards.
    pub fn encode(&self, shards: &mut [Vec<u8>]) -> Result<()> {
        self.check_slot_count(shards.len())?;
        let shard_len = shards.first().map(Vec::len).unwrap_or_default();
        check_lengths(shard_len, shards.iter().map(Vec::len))?;
        match &self.rs {
            Some(rs) => rs.encode(shards).map_err(TransportError::Erasure),
            None => Ok(()),
        }
    }

    /// Reconstruct every missing shard.
    ///
    /// `shards` has one slot per shard index; `None` marks an erasure. At
    /// least K slots must be filled and all filled slots must have the same
    /// length.
    pub fn decode(&self, mut shards: Vec<Option<Vec<u8>>>) -> Result<Vec<Vec<u8>>> {
        self.check_slot_count(shards.len())?;
        let present = shards.iter().flatten().count();
        if present < self.required {
            return Err(TransportError::TooFewShards {
                present,
                required: self.required,
            });
        }
        let shard_len = shards.iter().flatten().map(Vec::len).next().unwrap_or_default();
        check_lengths(shard_len, shards.iter().flatten().map(Vec::len))?;

        if let Some(rs) = &self.rs {
            rs.reconstruct(&mut shards).map_err(TransportError::Erasure)?;
        }
        shards
            .into_iter()
            .map(|shard| {
                shard.ok_or(TransportError::TooFewShards {
                    present,
                    required: self.required,
                })
            })
            .collect()
    }

    /// Concatenate the K data shards back into the framed payload.
    pub fn join(&self, shards: &[Vec<u8>]) -> Result<Vec<u8>> {
        let data = shards
            .get(..self.required)
            .ok_or(TransportError::TooFewShards {
                present: shards.len(),
                required: self.required,
            })?;
        Ok(data.concat())
    }

    /// Frame, split and encode a payload into N shards.
    pub fn encode_payload(&self, payload: &[u8]) -> Result<Vec<Vec<u8>>> {
        let framed = framing::frame(payload, self.required, self.total)?;
        let mut shards = self.split(&framed)?;
        self.encode(&mut shards)?;
        Ok(shards)
    }

    /// Decode, join and unframe a set of indexed shards back into the
    /// original payload.
    pub fn decode_payload(&self, shards: Vec<Option<Vec<u8>>>) -> Result<Vec<u8>> {
        let shards = self.decode(shards)?;
        let framed = self.join(&shards)?;
        framing::unframe(&framed).map(<[u8]>::to_vec)
    }

    fn check_slot_count(&self, actual: usize) -> Result<()> {
        if actual != self.total {
            return Err(TransportError::ShardCountMismatch {
                expected: self.total,
                actual,
            });
        }
        Ok(())
    }
}

fn check_lengths(expected: usize, mut lengths: impl Iterator<Item = usize>) -> Result<()> {
    if expected == 0 {
        return Err(TransportError::ShardSizeMismatch {
            expected: 1,
            actual: 0,
        });
    }
    match lengths.find(|len| *len != expected) {
        Some(actual) => Err(TransportError::ShardSizeMismatch { expected, actual }),
        None => Ok(()),
    }
}
