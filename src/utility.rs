//! Small utilities shared across the stack.

use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;

/// An internet checksum accumulator for the ones-complement sum used by the
/// TCP header, including the IPv4 pseudo-header.
///
/// Byte input may arrive in chunks of any length; an odd trailing byte is
/// carried over to the next chunk. The 16-bit helpers must only be called on
/// an even byte boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct Checksum {
    sum: u32,
    pending: Option<u8>,
}

impl Checksum {
    /// Creates a new checksum accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `u16` to the sum.
    pub fn add_u16(&mut self, value: u16) {
        debug_assert!(self.pending.is_none());
        self.sum += u32::from(value);
    }

    /// Adds a `u32` as two big-endian 16-bit words.
    pub fn add_u32(&mut self, value: u32) {
        self.add_u16((value >> 16) as u16);
        self.add_u16(value as u16);
    }

    /// Adds a run of bytes, pairing them big-endian and carrying an odd
    /// trailing byte into the next call.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match self.pending.take() {
                Some(high) => self.sum += u32::from(u16::from_be_bytes([high, byte])),
                None => self.pending = Some(byte),
            }
        }
    }

    /// Adds the IPv4 pseudo-header for a TCP segment of `tcp_len` bytes.
    pub fn add_pseudo_header(&mut self, src: Ipv4Addr, dst: Ipv4Addr, tcp_len: u16) {
        self.add_u32(u32::from(src));
        self.add_u32(u32::from(dst));
        self.add_u16(6); // zero byte, then the TCP protocol number
        self.add_u16(tcp_len);
    }

    /// The folded ones-complement sum, without the final complement. A
    /// segment summed together with its transmitted checksum folds to
    /// `0xffff` when intact. This is also the value NICs with transmit
    /// checksum offload expect pre-loaded into the checksum field.
    pub fn value(&self) -> u16 {
        let mut sum = self.sum;
        if let Some(high) = self.pending {
            sum += u32::from(u16::from_be_bytes([high, 0]));
        }
        while sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        sum as u16
    }

    /// The finished checksum: the complement of the folded sum.
    pub fn finish(&self) -> u16 {
        !self.value()
    }
}

/// A local or remote address and port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// The four-tuple identifying one connection. Used as the key of the
/// connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    pub local: Endpoint,
    pub remote: Endpoint,
}

impl ConnId {
    pub fn new(local: Endpoint, remote: Endpoint) -> Self {
        Self { local, remote }
    }

    /// The same connection as seen from the peer.
    pub const fn reverse(self) -> Self {
        Self {
            local: self.remote,
            remote: self.local,
        }
    }

    /// The flow hash used to route a connection to its owning shard. Active
    /// opens re-roll the ephemeral port until this hash lands on the local
    /// shard, so inbound segments for the tuple arrive where the connection
    /// lives.
    pub fn shard_hash(&self) -> u32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish() as u32
    }
}

impl Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_folds_carries() {
        let mut csum = Checksum::new();
        csum.add_u16(0xffff);
        csum.add_u16(0x0001);
        assert_eq!(csum.value(), 0x0001);
    }

    #[test]
    fn checksum_odd_tail_pads_with_zero() {
        let mut csum = Checksum::new();
        csum.add_bytes(&[0x12, 0x34, 0x56]);
        let mut even = Checksum::new();
        even.add_bytes(&[0x12, 0x34, 0x56, 0x00]);
        assert_eq!(csum.value(), even.value());
    }

    #[test]
    fn checksum_chunk_boundaries_do_not_matter() {
        let mut split = Checksum::new();
        split.add_bytes(&[0xde, 0xad, 0xbe]);
        split.add_bytes(&[0xef, 0x01]);
        split.add_bytes(&[0x02]);
        let mut whole = Checksum::new();
        whole.add_bytes(&[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02]);
        assert_eq!(split.value(), whole.value());
    }

    #[test]
    fn reverse_swaps_endpoints() {
        let id = ConnId::new(
            Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 0xcafe),
            Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 0xbeef),
        );
        let rev = id.reverse();
        assert_eq!(rev.local, id.remote);
        assert_eq!(rev.remote, id.local);
        assert_eq!(rev.reverse(), id);
    }
}
