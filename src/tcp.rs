//! The per-shard TCP stack: connection demultiplexing, listener and
//! connection tables, stray-segment resets, and the packet-provider pull
//! interface.
//!
//! One [`Tcp`] instance serves one shard of a shared-nothing stack. Inbound
//! segments arrive whole through [`Tcp::received`]; outbound segments leave
//! one at a time through [`Tcp::poll_transmit`], which alternates between a
//! queue of connection-less packets (resets, mostly) and the ring of
//! connections that have something to send.

pub mod connection;
pub mod listener;
pub mod options;
pub mod seq;
mod tcb;
pub mod tcp_parsing;

use self::connection::Connection;
use self::listener::TcpListener;
use self::seq::SeqNum;
use self::tcb::{drive, TcbHandle, USER_QUEUE_SPACE};
use self::tcp_parsing::{ChecksumMode, TcpHeader, TcpHeaderBuilder};
use crate::neighbor::{EthernetAddress, L2Resolver};
use crate::payload::Payload;
use crate::utility::{ConnId, Endpoint};
use dashmap::DashMap;
use md5::{Digest, Md5};
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::trace;

/// Ephemeral ports drawn for active opens.
const EPHEMERAL_PORTS: RangeInclusive<u16> = 41952..=65535;

/// Default length of a listener's accept queue.
pub const DEFAULT_LISTEN_BACKLOG: usize = 100;

/// How often the pull hook drains the stray-packet queue when connections
/// are also waiting: every this-many connection polls.
const STRAY_PACKET_INTERVAL: u32 = 128;

/// The errors a connection surfaces to its user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TcpError {
    /// The connection was reset, by the peer or by local teardown.
    #[error("connection is reset")]
    Reset,
    /// The handshake gave up after exhausting its SYN retransmissions.
    #[error("failed to connect")]
    ConnectFailed,
    /// The peer answered our connection attempt with a reset.
    #[error("connection refused")]
    Refused,
}

/// What the device under the stack can do, as reported by the embedder.
#[derive(Debug, Clone, Copy)]
pub struct HwFeatures {
    pub mtu: u16,
    /// Largest super-segment the device accepts when `tx_tso` is set.
    pub max_packet_len: u32,
    pub tx_tso: bool,
    pub tx_csum_offload: bool,
    pub rx_csum_offload: bool,
}

impl Default for HwFeatures {
    fn default() -> Self {
        Self {
            mtu: 1500,
            max_packet_len: 65535,
            tx_tso: false,
            tx_csum_offload: false,
            rx_csum_offload: false,
        }
    }
}

/// How initial sequence numbers are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isn {
    /// RFC 6528: MD5 over the connection tuple and a process-lifetime
    /// 512-bit secret, plus a quarter-microsecond clock term.
    #[default]
    Rfc6528,
    /// A deterministic per-connection sequence, for reproducible tests.
    FromSeed(u64),
}

enum IsnGen {
    Rfc6528 { secret: [u8; 64] },
    FromSeed(u64),
}

impl IsnGen {
    fn new(mode: Isn) -> Self {
        match mode {
            Isn::Rfc6528 => {
                let mut secret = [0u8; 64];
                SmallRng::from_entropy().fill_bytes(&mut secret);
                IsnGen::Rfc6528 { secret }
            }
            Isn::FromSeed(seed) => IsnGen::FromSeed(seed),
        }
    }

    fn next(&mut self, id: &ConnId) -> SeqNum {
        match self {
            IsnGen::Rfc6528 { secret } => {
                let mut hasher = Md5::new();
                hasher.update(id.local.address.octets());
                hasher.update(id.remote.address.octets());
                hasher.update(id.local.port.to_be_bytes());
                hasher.update(id.remote.port.to_be_bytes());
                hasher.update(&secret[..]);
                let digest = hasher.finalize();
                let tuple_hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
                let micros = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_micros() as u64)
                    .unwrap_or(0);
                SeqNum(tuple_hash.wrapping_add((micros / 4) as u32))
            }
            IsnGen::FromSeed(counter) => {
                let isn = SmallRng::seed_from_u64(*counter).next_u32();
                *counter += 1;
                SeqNum(isn)
            }
        }
    }
}

/// One segment ready for the wire, as handed to the packet provider. The
/// protocol is always TCP.
#[derive(Debug)]
pub struct OutboundPacket {
    pub remote_ip: Ipv4Addr,
    pub l2_dst: EthernetAddress,
    pub data: Vec<u8>,
}

struct StrayQueue {
    queue: VecDeque<OutboundPacket>,
    /// Remaining byte credit; packets that do not fit are dropped and the
    /// peer's retransmission covers the loss.
    space: usize,
}

pub(crate) struct StackShared {
    host: Ipv4Addr,
    hw: HwFeatures,
    shard_id: u32,
    shard_count: u32,
    tcbs: DashMap<ConnId, Arc<TcbHandle>>,
    listening: DashMap<u16, mpsc::Sender<Connection>>,
    resolver: Arc<dyn L2Resolver>,
    /// Connections with something to transmit, with their resolved next
    /// hops, drained round-robin by the pull hook.
    poll_tcbs: Mutex<VecDeque<(Arc<TcbHandle>, EthernetAddress)>>,
    stray: Mutex<StrayQueue>,
    tcb_polled: AtomicU32,
    isn: Mutex<IsnGen>,
    ports: Mutex<SmallRng>,
}

impl StackShared {
    /// Puts a connection on the transmit ring, resolving its L2 next hop
    /// first if this is its first transmission.
    pub(crate) fn poll_tcb(self: Arc<Self>, handle: Arc<TcbHandle>) {
        let cached = *handle.l2_dst.lock().unwrap();
        if let Some(dst) = cached {
            self.poll_tcbs.lock().unwrap().push_back((handle, dst));
            return;
        }
        if let Some(dst) = self.resolver.cached(handle.id.remote.address) {
            *handle.l2_dst.lock().unwrap() = Some(dst);
            self.poll_tcbs.lock().unwrap().push_back((handle, dst));
            return;
        }
        let resolver = Arc::clone(&self.resolver);
        tokio::spawn(async move {
            let dst = resolver.resolve(handle.id.remote.address).await;
            *handle.l2_dst.lock().unwrap() = Some(dst);
            self.poll_tcbs.lock().unwrap().push_back((handle, dst));
        });
    }

    pub(crate) fn remove_tcb(&self, id: &ConnId) {
        self.tcbs.remove(id);
    }

    pub(crate) fn unbind_listener(&self, port: u16) {
        self.listening.remove(&port);
    }

    /// Answers a segment that reached no connection with a reset, unless the
    /// segment is itself a reset.
    pub(crate) fn respond_with_reset(self: Arc<Self>, th: &TcpHeader, local: Ipv4Addr, remote: Ipv4Addr) {
        if th.ctl.rst() {
            return;
        }
        let seq = if th.ctl.ack() { th.ack } else { SeqNum(0) };
        let mut builder = TcpHeaderBuilder::new(th.dst_port, th.src_port, seq).rst();
        if th.ctl.syn() {
            // Acknowledge the ISN so the peer can match the reset to its
            // attempt.
            builder = builder.ack(th.seq + 1);
        }
        let mode = if self.hw.tx_csum_offload {
            ChecksumMode::Offloaded
        } else {
            ChecksumMode::Software
        };
        let header = builder.build(local, remote, &Payload::default(), mode);
        self.send_packet_without_tcb(remote, header.serialize());
    }

    fn send_packet_without_tcb(self: Arc<Self>, to: Ipv4Addr, data: Vec<u8>) {
        {
            let mut stray = self.stray.lock().unwrap();
            if stray.space < data.len() {
                trace!(%to, "stray queue full, dropping packet");
                return;
            }
            stray.space -= data.len();
        }
        if let Some(dst) = self.resolver.cached(to) {
            self.stray.lock().unwrap().queue.push_back(OutboundPacket {
                remote_ip: to,
                l2_dst: dst,
                data,
            });
            return;
        }
        let resolver = Arc::clone(&self.resolver);
        tokio::spawn(async move {
            let dst = resolver.resolve(to).await;
            self.stray.lock().unwrap().queue.push_back(OutboundPacket {
                remote_ip: to,
                l2_dst: dst,
                data,
            });
        });
    }
}

/// A per-shard TCP stack instance.
pub struct Tcp {
    inner: Arc<StackShared>,
}

impl Tcp {
    /// Creates a stack for a single-shard embedding.
    pub fn new(
        host: Ipv4Addr,
        hw: HwFeatures,
        resolver: Arc<dyn L2Resolver>,
        isn: Isn,
    ) -> Self {
        Self::sharded(host, hw, resolver, isn, 0, 1)
    }

    /// Creates the stack instance owning shard `shard_id` of `shard_count`.
    /// Active opens re-roll their ephemeral port until the connection tuple
    /// hashes to this shard.
    pub fn sharded(
        host: Ipv4Addr,
        hw: HwFeatures,
        resolver: Arc<dyn L2Resolver>,
        isn: Isn,
        shard_id: u32,
        shard_count: u32,
    ) -> Self {
        assert!(shard_count > 0 && shard_id < shard_count);
        Self {
            inner: Arc::new(StackShared {
                host,
                hw,
                shard_id,
                shard_count,
                tcbs: DashMap::new(),
                listening: DashMap::new(),
                resolver,
                poll_tcbs: Mutex::new(VecDeque::new()),
                stray: Mutex::new(StrayQueue {
                    queue: VecDeque::new(),
                    space: USER_QUEUE_SPACE,
                }),
                tcb_polled: AtomicU32::new(0),
                isn: Mutex::new(IsnGen::new(isn)),
                ports: Mutex::new(SmallRng::from_entropy()),
            }),
        }
    }

    pub fn hw_features(&self) -> HwFeatures {
        self.inner.hw
    }

    /// The source and destination ports of a raw segment, for the embedder's
    /// RSS-style flow hashing.
    pub fn flow_ports(segment: &[u8]) -> Option<(u16, u16)> {
        if segment.len() < 4 {
            return None;
        }
        Some((
            u16::from_be_bytes([segment[0], segment[1]]),
            u16::from_be_bytes([segment[2], segment[3]]),
        ))
    }

    /// Binds a listener to `port` with an accept queue of `queue_length`
    /// connections ([`DEFAULT_LISTEN_BACKLOG`] is customary). Rebinding a
    /// port replaces the previous listener.
    pub fn listen(&self, port: u16, queue_length: usize) -> TcpListener {
        let (sender, receiver) = mpsc::channel(queue_length.max(1));
        self.inner.listening.insert(port, sender);
        TcpListener::new(port, receiver, Arc::downgrade(&self.inner))
    }

    /// Opens a connection to `remote`, resolving once the handshake
    /// completes or fails.
    pub async fn connect(&self, remote: Endpoint) -> Result<Connection, TcpError> {
        let id = {
            let mut ports = self.inner.ports.lock().unwrap();
            loop {
                let port = ports.gen_range(EPHEMERAL_PORTS);
                let id = ConnId::new(Endpoint::new(self.inner.host, port), remote);
                if id.shard_hash() % self.inner.shard_count == self.inner.shard_id
                    && !self.inner.tcbs.contains_key(&id)
                {
                    break id;
                }
            }
        };
        let iss = self.inner.isn.lock().unwrap().next(&id);
        let handle = TcbHandle::new(id, self.inner.hw, Arc::downgrade(&self.inner), iss);
        self.inner.tcbs.insert(id, Arc::clone(&handle));
        let done = handle.connect();
        tokio::spawn(drive(Arc::clone(&handle)));
        match done.await {
            Ok(Ok(())) => Ok(Connection::new(handle)),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(TcpError::Reset),
        }
    }

    /// The IP layer's inbound callback: one whole TCP segment plus the
    /// addresses it traveled between. Undecodable segments are dropped
    /// without a response.
    pub fn received(&self, segment: &[u8], from: Ipv4Addr, to: Ipv4Addr) {
        let verify = !self.inner.hw.rx_csum_offload;
        let header = match TcpHeader::parse(segment, from, to, verify) {
            Ok(header) => header,
            Err(error) => {
                trace!(%from, %to, %error, "dropping undecodable segment");
                return;
            }
        };
        let payload = Payload::from(&segment[header.header_len()..]);
        let id = ConnId::new(
            Endpoint::new(to, header.dst_port),
            Endpoint::new(from, header.src_port),
        );

        let existing = self.inner.tcbs.get(&id).map(|entry| entry.value().clone());
        if let Some(handle) = existing {
            handle.input(&header, payload);
            return;
        }

        let listener = self
            .inner
            .listening
            .get(&header.dst_port)
            .map(|entry| entry.value().clone());
        if let Some(sender) = listener {
            // The accept queue must have room before we commit to the
            // handshake; a full queue refuses the SYN below.
            if let Ok(permit) = sender.try_reserve() {
                if header.ctl.rst() {
                    return;
                }
                if header.ctl.ack() {
                    // An ACK on a listening port matches no connection.
                    return Arc::clone(&self.inner).respond_with_reset(&header, to, from);
                }
                if header.ctl.syn() {
                    let iss = self.inner.isn.lock().unwrap().next(&id);
                    let handle =
                        TcbHandle::new(id, self.inner.hw, Arc::downgrade(&self.inner), iss);
                    permit.send(Connection::new(Arc::clone(&handle)));
                    self.inner.tcbs.insert(id, Arc::clone(&handle));
                    handle.input_listen(&header);
                    tokio::spawn(drive(handle));
                    return;
                }
                // Anything else aimed at a listener is dropped.
                return;
            }
        }

        Arc::clone(&self.inner).respond_with_reset(&header, to, from);
    }

    /// The packet-provider pull: returns at most one segment per call.
    ///
    /// Stray packets are drained when no connection is scheduled, and once
    /// every [`STRAY_PACKET_INTERVAL`] connection polls so resets cannot be
    /// starved by busy connections.
    pub fn poll_transmit(&self) -> Option<OutboundPacket> {
        let scheduled = self.inner.poll_tcbs.lock().unwrap().len();
        let polled = self.inner.tcb_polled.load(Ordering::Relaxed);
        {
            let mut stray = self.inner.stray.lock().unwrap();
            if !stray.queue.is_empty() && (polled % STRAY_PACKET_INTERVAL == 0 || scheduled == 0) {
                if let Some(packet) = stray.queue.pop_front() {
                    stray.space += packet.data.len();
                    return Some(packet);
                }
            }
        }
        loop {
            let entry = self.inner.poll_tcbs.lock().unwrap().pop_front();
            let (handle, dst) = entry?;
            self.inner.tcb_polled.fetch_add(1, Ordering::Relaxed);
            if let Some(segment) = handle.get_packet() {
                return Some(OutboundPacket {
                    remote_ip: handle.id.remote.address,
                    l2_dst: dst,
                    data: segment.to_bytes(),
                });
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tcb_count(&self) -> usize {
        self.inner.tcbs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::StaticNeighbors;

    const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const REMOTE_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const REMOTE_MAC: EthernetAddress = EthernetAddress([2, 0, 0, 0, 0, 2]);

    fn test_stack() -> Tcp {
        let mut neighbors = StaticNeighbors::new();
        neighbors.insert(REMOTE_IP, REMOTE_MAC);
        Tcp::new(
            LOCAL_IP,
            HwFeatures::default(),
            Arc::new(neighbors),
            Isn::FromSeed(0),
        )
    }

    fn raw_segment(builder: TcpHeaderBuilder, payload: &Payload) -> Vec<u8> {
        let header = builder.build(REMOTE_IP, LOCAL_IP, payload, ChecksumMode::Software);
        let mut wire = header.serialize();
        wire.extend_from_slice(&payload.to_vec());
        wire
    }

    fn parse_out(packet: &OutboundPacket) -> TcpHeader {
        TcpHeader::parse(&packet.data, LOCAL_IP, REMOTE_IP, true).expect("stack emitted a bad segment")
    }

    #[tokio::test]
    async fn stray_ack_gets_reset_with_its_ack_as_seq() {
        let tcp = test_stack();
        let segment = raw_segment(
            TcpHeaderBuilder::new(5555, 80, SeqNum(100)).ack(SeqNum(7777)),
            &Payload::default(),
        );
        tcp.received(&segment, REMOTE_IP, LOCAL_IP);
        let out = tcp.poll_transmit().expect("a reset should be queued");
        let th = parse_out(&out);
        assert!(th.ctl.rst());
        assert!(!th.ctl.ack());
        assert_eq!(th.seq, SeqNum(7777));
        assert_eq!(th.src_port, 80);
        assert_eq!(th.dst_port, 5555);
        assert_eq!(out.l2_dst, REMOTE_MAC);
    }

    #[tokio::test]
    async fn stray_syn_gets_reset_acking_the_isn() {
        let tcp = test_stack();
        let segment = raw_segment(
            TcpHeaderBuilder::new(5555, 80, SeqNum(1000)).syn(),
            &Payload::default(),
        );
        tcp.received(&segment, REMOTE_IP, LOCAL_IP);
        let out = tcp.poll_transmit().expect("a reset should be queued");
        let th = parse_out(&out);
        assert!(th.ctl.rst());
        assert!(th.ctl.ack());
        assert_eq!(th.seq, SeqNum(0));
        assert_eq!(th.ack, SeqNum(1001));
    }

    #[tokio::test]
    async fn inbound_rst_is_never_answered() {
        let tcp = test_stack();
        let segment = raw_segment(
            TcpHeaderBuilder::new(5555, 80, SeqNum(1000)).rst(),
            &Payload::default(),
        );
        tcp.received(&segment, REMOTE_IP, LOCAL_IP);
        assert!(tcp.poll_transmit().is_none());
    }

    #[tokio::test]
    async fn corrupt_segments_are_dropped_silently() {
        let tcp = test_stack();
        let mut segment = raw_segment(
            TcpHeaderBuilder::new(5555, 80, SeqNum(1000)).syn(),
            &Payload::default(),
        );
        segment[4] ^= 0xff;
        tcp.received(&segment, REMOTE_IP, LOCAL_IP);
        assert!(tcp.poll_transmit().is_none());
        assert_eq!(tcp.tcb_count(), 0);
    }

    #[tokio::test]
    async fn syn_to_listener_creates_a_connection() {
        let tcp = test_stack();
        let mut listener = tcp.listen(80, 8);
        let segment = raw_segment(
            TcpHeaderBuilder::new(5555, 80, SeqNum(1000)).syn().window(65535),
            &Payload::default(),
        );
        tcp.received(&segment, REMOTE_IP, LOCAL_IP);
        assert_eq!(tcp.tcb_count(), 1);

        let out = tcp.poll_transmit().expect("SYN-ACK should be queued");
        let th = parse_out(&out);
        assert!(th.ctl.syn());
        assert!(th.ctl.ack());
        assert_eq!(th.ack, SeqNum(1001));

        let connection = listener.accept().await.expect("connection queued");
        assert_eq!(connection.peer_addr(), Endpoint::new(REMOTE_IP, 5555));
        assert_eq!(connection.local_addr(), Endpoint::new(LOCAL_IP, 80));
    }

    #[tokio::test]
    async fn full_accept_queue_refuses_with_reset() {
        let tcp = test_stack();
        let _listener = tcp.listen(80, 1);

        let first = raw_segment(
            TcpHeaderBuilder::new(5555, 80, SeqNum(1000)).syn(),
            &Payload::default(),
        );
        tcp.received(&first, REMOTE_IP, LOCAL_IP);
        assert_eq!(tcp.tcb_count(), 1);

        let second = raw_segment(
            TcpHeaderBuilder::new(5556, 80, SeqNum(2000)).syn(),
            &Payload::default(),
        );
        tcp.received(&second, REMOTE_IP, LOCAL_IP);
        // No second connection; the stray queue answers with RST,ACK.
        assert_eq!(tcp.tcb_count(), 1);

        // The ring holds the SYN-ACK; the stray queue holds the reset. With
        // connections scheduled and the poll counter at zero, the stray
        // packet goes first.
        let out = tcp.poll_transmit().expect("reset should be queued");
        let th = parse_out(&out);
        assert!(th.ctl.rst());
        assert!(th.ctl.ack());
        assert_eq!(th.seq, SeqNum(0));
        assert_eq!(th.ack, SeqNum(2001));
        assert_eq!(th.dst_port, 5556);
    }

    #[tokio::test]
    async fn dropping_the_listener_unbinds_the_port() {
        let tcp = test_stack();
        let listener = tcp.listen(80, 4);
        drop(listener);
        let segment = raw_segment(
            TcpHeaderBuilder::new(5555, 80, SeqNum(1000)).syn(),
            &Payload::default(),
        );
        tcp.received(&segment, REMOTE_IP, LOCAL_IP);
        assert_eq!(tcp.tcb_count(), 0);
        let out = tcp.poll_transmit().expect("reset should be queued");
        assert!(parse_out(&out).ctl.rst());
    }

    #[test]
    fn flow_ports_reads_the_port_pair() {
        let wire = raw_segment(
            TcpHeaderBuilder::new(0xcafe, 0xbabe, SeqNum(1)),
            &Payload::default(),
        );
        assert_eq!(Tcp::flow_ports(&wire), Some((0xcafe, 0xbabe)));
        assert_eq!(Tcp::flow_ports(&wire[..3]), None);
    }

    fn paired_stacks() -> (Arc<Tcp>, Arc<Tcp>) {
        let mut a_neighbors = StaticNeighbors::new();
        a_neighbors.insert(REMOTE_IP, REMOTE_MAC);
        let mut b_neighbors = StaticNeighbors::new();
        b_neighbors.insert(LOCAL_IP, EthernetAddress([2, 0, 0, 0, 0, 1]));
        let a = Arc::new(Tcp::new(
            LOCAL_IP,
            HwFeatures::default(),
            Arc::new(a_neighbors),
            Isn::FromSeed(1),
        ));
        let b = Arc::new(Tcp::new(
            REMOTE_IP,
            HwFeatures::default(),
            Arc::new(b_neighbors),
            Isn::FromSeed(2),
        ));
        (a, b)
    }

    /// Shuttles segments between the two stacks in the background, playing
    /// the role of the reactor that drives the packet provider.
    fn spawn_pumper(a: &Arc<Tcp>, b: &Arc<Tcp>) -> tokio::task::JoinHandle<()> {
        let a = Arc::clone(a);
        let b = Arc::clone(b);
        tokio::spawn(async move {
            loop {
                while let Some(packet) = a.poll_transmit() {
                    b.received(&packet.data, LOCAL_IP, REMOTE_IP);
                }
                while let Some(packet) = b.poll_transmit() {
                    a.received(&packet.data, REMOTE_IP, LOCAL_IP);
                }
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            }
        })
    }

    #[tokio::test]
    async fn end_to_end_handshake_data_and_close() {
        let (a, b) = paired_stacks();
        let mut listener = b.listen(80, 4);
        let pumper = spawn_pumper(&a, &b);

        let conn_a = a
            .connect(Endpoint::new(REMOTE_IP, 80))
            .await
            .expect("handshake succeeds");
        let conn_b = listener.accept().await.expect("connection queued");
        assert_eq!(conn_a.peer_addr(), Endpoint::new(REMOTE_IP, 80));
        assert_eq!(conn_b.peer_addr().address, LOCAL_IP);

        conn_a.send(&b"hello over the wire"[..]).await.expect("send");
        conn_b.wait_for_data().await.expect("data arrives");
        assert_eq!(conn_b.read().to_vec(), b"hello over the wire");
        conn_a
            .wait_for_all_data_acked()
            .await
            .expect("delivery acknowledged");

        // Graceful close from both sides tears both connections down.
        conn_a.close_write();
        conn_b.wait_for_data().await.expect("peer sent its FIN");
        conn_b.close_write();
        for _ in 0..500 {
            if a.tcb_count() == 0 && b.tcb_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert_eq!(a.tcb_count(), 0);
        assert_eq!(b.tcb_count(), 0);
        pumper.abort();
    }

    #[test]
    fn seeded_isn_is_deterministic() {
        let id = ConnId::new(
            Endpoint::new(LOCAL_IP, 1234),
            Endpoint::new(REMOTE_IP, 80),
        );
        let mut a = IsnGen::new(Isn::FromSeed(42));
        let mut b = IsnGen::new(Isn::FromSeed(42));
        let first = a.next(&id);
        assert_eq!(first, b.next(&id));
        // Consecutive connections still get different ISNs.
        assert_ne!(first, a.next(&id));
    }

    #[test]
    fn rfc6528_isn_depends_on_the_tuple() {
        let mut gen = IsnGen::new(Isn::Rfc6528);
        let id = ConnId::new(
            Endpoint::new(LOCAL_IP, 1234),
            Endpoint::new(REMOTE_IP, 80),
        );
        let a = gen.next(&id);
        let b = gen.next(&id.reverse());
        // Different tuples hash apart even at (nearly) the same instant.
        assert_ne!(a, b);
    }
}
