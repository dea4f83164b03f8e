//! Fragment wire format.
//!
//! One shard travels in one datagram:
//!
//! ```text
//! [sender_id: 6][logical_id: u32-le][shard_index: u8][shard: L bytes][checksum: 8]
//! ```
//!
//! The checksum covers everything before it, header included, so a corrupted
//! index or id is caught with the shard. `L` is implied by the datagram
//! length.

use {
    crate::{
        checksum::{append_checksum, verify_checksum, CHECKSUM_LEN},
        error::{Result, TransportError},
    },
    std::{
        fmt,
        net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    },
};

/// Bytes taken by a [`SenderId`].
pub const SENDER_ID_LEN: usize = 6;

/// Bytes in front of the shard: sender id, logical id, shard index.
pub const FRAGMENT_HEADER_LEN: usize = SENDER_ID_LEN + 4 + 1;

/// Datagram size for a shard of `shard_len` bytes.
pub const fn datagram_len(shard_len: usize) -> usize {
    FRAGMENT_HEADER_LEN + shard_len + CHECKSUM_LEN
}

/// Fixed-width sender identity: an IPv4 address followed by a little-endian
/// port.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SenderId([u8; SENDER_ID_LEN]);

impl SenderId {
    pub const fn new(bytes: [u8; SENDER_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; SENDER_ID_LEN] {
        self.0
    }

    /// The socket address this id encodes.
    pub fn to_socket_addr(self) -> SocketAddrV4 {
        let [a, b, c, d, lo, hi] = self.0;
        SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), u16::from_le_bytes([lo, hi]))
    }
}

impl From<SocketAddrV4> for SenderId {
    fn from(addr: SocketAddrV4) -> Self {
        let [a, b, c, d] = addr.ip().octets();
        let [lo, hi] = addr.port().to_le_bytes();
        Self([a, b, c, d, lo, hi])
    }
}

impl From<SocketAddr> for SenderId {
    /// IPv6 addresses use their IPv4-mapped form when they have one and
    /// their last four octets otherwise.
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => v4.into(),
            SocketAddr::V6(v6) => {
                let ip = v6.ip().to_ipv4_mapped().unwrap_or_else(|| {
                    let [.., a, b, c, d] = v6.ip().octets();
                    Ipv4Addr::new(a, b, c, d)
                });
                SocketAddrV4::new(ip, v6.port()).into()
            }
        }
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_socket_addr().fmt(f)
    }
}

impl fmt::Debug for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SenderId({})", self.to_socket_addr())
    }
}

/// One erasure-coded shard of a logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Identity of the sending endpoint.
    pub sender: SenderId,
    /// Correlates the shards of one message. Every value is valid.
    pub logical_id: u32,
    /// Position of this shard among the N shards.
    pub index: u8,
    /// Shard bytes.
    pub shard: Vec<u8>,
}

impl Fragment {
    /// Serialize into a checksummed datagram.
    pub fn to_datagram(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(datagram_len(self.shard.len()));
        buf.extend_from_slice(&self.sender.to_bytes());
        buf.extend_from_slice(&self.logical_id.to_le_bytes());
        buf.push(self.index);
        buf.extend_from_slice(&self.shard);
        append_checksum(&mut buf);
        buf
    }

    /// Verify and parse a received datagram.
    ///
    /// The checksum is checked before any header field is trusted.
    pub fn from_datagram(datagram: &[u8]) -> Result<Self> {
        let body = verify_checksum(datagram).ok_or(TransportError::ChecksumMismatch)?;
        if body.len() <= FRAGMENT_HEADER_LEN {
            return Err(TransportError::MalformedFragment(format!(
                "{} byte fragment carries no shard",
                body.len()
            )));
        }
        let (header, shard) = body.split_at(FRAGMENT_HEADER_LEN);
        let mut sender = [0u8; SENDER_ID_LEN];
        sender.copy_from_slice(&header[..SENDER_ID_LEN]);
        let mut logical_id = [0u8; 4];
        logical_id.copy_from_slice(&header[SENDER_ID_LEN..SENDER_ID_LEN + 4]);
        Ok(Self {
            sender: SenderId(sender),
            logical_id: u32::from_le_bytes(logical_id),
            index: header[SENDER_ID_LEN + 4],
            shard: shard.to_vec(),
        })
    }
}
