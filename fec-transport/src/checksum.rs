//! Fragment integrity trailer.
//!
//! Every datagram ends in the 8-byte little-endian SipHash-2-4 digest of the
//! bytes before it, keyed with the all-zero key. This is a corruption filter,
//! not authentication: anyone can compute it.

use {siphasher::sip::SipHasher24, std::hash::Hasher};

/// Length of the checksum trailer.
pub const CHECKSUM_LEN: usize = 8;

/// Compute the trailer value for `bytes`.
pub fn checksum(bytes: &[u8]) -> u64 {
    let mut hasher = SipHasher24::new_with_keys(0, 0);
    hasher.write(bytes);
    hasher.finish()
}

/// Append the checksum of the current contents of `buf` to it.
pub fn append_checksum(buf: &mut Vec<u8>) {
    let digest = checksum(buf);
    buf.extend_from_slice(&digest.to_le_bytes());
}

/// Verify the trailer and return the bytes it covers.
///
/// Returns `None` when the input has no payload in front of the trailer or
/// when the digest does not match.
pub fn verify_checksum(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() <= CHECKSUM_LEN {
        return None;
    }
    let (payload, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let expected = u64::from_le_bytes(trailer.try_into().ok()?);
    (checksum(payload) == expected).then_some(payload)
}
