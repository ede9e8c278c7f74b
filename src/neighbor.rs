//! L2 next-hop resolution.
//!
//! The engine does not know how to find the Ethernet address behind an IP
//! next hop; the embedding stack does (ARP, a routing table, a tap device's
//! fixed peer). [`L2Resolver`] is that seam. Resolution is asynchronous and
//! the result is cached per connection, so the slow path runs once per
//! neighbor.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::net::Ipv4Addr;

/// A six-octet Ethernet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EthernetAddress(pub [u8; 6]);

impl EthernetAddress {
    pub const BROADCAST: EthernetAddress = EthernetAddress([0xff; 6]);
}

impl Display for EthernetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Resolves the L2 destination for packets toward an IP next hop.
#[async_trait]
pub trait L2Resolver: Send + Sync {
    /// The fast path: a destination this resolver can answer without
    /// waiting. The stack schedules transmissions synchronously when this
    /// hits.
    fn cached(&self, ip: Ipv4Addr) -> Option<EthernetAddress> {
        let _ = ip;
        None
    }

    /// Resolves the L2 address for `ip`, waiting as long as it takes.
    async fn resolve(&self, ip: Ipv4Addr) -> EthernetAddress;
}

/// A fixed neighbor table, for tests and point-to-point links.
#[derive(Debug, Default)]
pub struct StaticNeighbors {
    table: HashMap<Ipv4Addr, EthernetAddress>,
    fallback: Option<EthernetAddress>,
}

impl StaticNeighbors {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that answers every lookup with the same address, as on a
    /// point-to-point link.
    pub fn all_to(fallback: EthernetAddress) -> Self {
        Self {
            table: HashMap::new(),
            fallback: Some(fallback),
        }
    }

    pub fn insert(&mut self, ip: Ipv4Addr, mac: EthernetAddress) {
        self.table.insert(ip, mac);
    }
}

#[async_trait]
impl L2Resolver for StaticNeighbors {
    fn cached(&self, ip: Ipv4Addr) -> Option<EthernetAddress> {
        self.table.get(&ip).copied().or(self.fallback)
    }

    async fn resolve(&self, ip: Ipv4Addr) -> EthernetAddress {
        self.cached(ip).unwrap_or(EthernetAddress::BROADCAST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_table_lookup() {
        let mut neighbors = StaticNeighbors::new();
        let ip = Ipv4Addr::new(10, 0, 0, 7);
        let mac = EthernetAddress([2, 0, 0, 0, 0, 7]);
        neighbors.insert(ip, mac);
        assert_eq!(neighbors.cached(ip), Some(mac));
        assert_eq!(neighbors.resolve(ip).await, mac);
        assert_eq!(neighbors.cached(Ipv4Addr::new(10, 0, 0, 8)), None);
        assert_eq!(
            neighbors.resolve(Ipv4Addr::new(10, 0, 0, 8)).await,
            EthernetAddress::BROADCAST
        );
    }

    #[test]
    fn displays_colon_separated() {
        let mac = EthernetAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "de:ad:be:ef:00:01");
    }
}
