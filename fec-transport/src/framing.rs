//! Length-prefixed padding frame.
//!
//! ```text
//! [len mod 65536 : u16-le][payload : len bytes][zero padding]
//! ```
//!
//! The frame is padded to a multiple of `lcm(required, total)` so it is both
//! a multiple of the total shard count and evenly divisible into the data
//! shards. Payloads may be up to `65536 * required` bytes; the prefix only
//! carries the low 16 bits of the length and [`unframe`] recovers the rest
//! from the frame size, which is unambiguous because padding is always
//! shorter than 65536 bytes.

use crate::error::{Result, TransportError};

/// Bytes taken by the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Span covered by the 16-bit length prefix.
const PREFIX_SPAN: usize = 1 << 16;

/// Largest payload a frame can carry for the given data shard count.
pub fn max_payload_len(required: usize) -> usize {
    PREFIX_SPAN.saturating_mul(required)
}

/// Length of the frame [`frame`] produces for a `payload_len`-byte payload.
pub fn framed_len(payload_len: usize, required: usize, total: usize) -> usize {
    let unit = alignment(required, total);
    LENGTH_PREFIX_LEN
        .saturating_add(payload_len)
        .div_ceil(unit)
        .saturating_mul(unit)
}

/// Prefix `payload` with its length and pad it for splitting into shards.
pub fn frame(payload: &[u8], required: usize, total: usize) -> Result<Vec<u8>> {
    if payload.is_empty() {
        return Err(TransportError::EmptyPayload);
    }
    let max = max_payload_len(required);
    if payload.len() > max {
        return Err(TransportError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }

    let prefix = (payload.len() % PREFIX_SPAN) as u16;
    let mut out = Vec::with_capacity(framed_len(payload.len(), required, total));
    out.extend_from_slice(&prefix.to_le_bytes());
    out.extend_from_slice(payload);
    out.resize(framed_len(payload.len(), required, total), 0);
    Ok(out)
}

/// Strip the length prefix and padding added by [`frame`].
pub fn unframe(framed: &[u8]) -> Result<&[u8]> {
    let Some((prefix, body)) = framed.split_first_chunk::<LENGTH_PREFIX_LEN>() else {
        return Err(TransportError::Truncated {
            needed: LENGTH_PREFIX_LEN,
            actual: framed.len(),
        });
    };
    let declared = u16::from_le_bytes(*prefix) as usize;
    if body.len() < declared {
        return Err(TransportError::Truncated {
            needed: LENGTH_PREFIX_LEN.saturating_add(declared),
            actual: framed.len(),
        });
    }

    // Largest length congruent to the prefix that still fits in the body.
    let wraps = (body.len() - declared) / PREFIX_SPAN;
    let len = declared + wraps * PREFIX_SPAN;
    if len == 0 {
        return Err(TransportError::EmptyPayload);
    }
    Ok(&body[..len])
}

fn alignment(required: usize, total: usize) -> usize {
    let (required, total) = (required.max(1), total.max(1));
    required / gcd(required, total) * total
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
