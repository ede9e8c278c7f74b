//! A user-space TCP protocol engine for shared-nothing network stacks.
//!
//! This crate implements the per-connection machinery of TCP: the RFC 793
//! state machine, sequence-number accounting, reliable retransmission,
//! congestion control (RFC 5681 with the NewReno modification of RFC 6582),
//! delayed acknowledgment, window management, and option negotiation. It does
//! not speak to the network itself. Instead it is designed to be embedded in
//! a run-to-completion stack that owns the NIC: the embedder feeds whole TCP
//! segments in through [`Tcp::received`] and drains outbound segments by
//! polling [`Tcp::poll_transmit`], one segment per poll.
//!
//! # Organization
//!
//! - [`Tcp`] is the per-shard stack object. It owns the connection and
//!   listener tables, routes inbound segments to the right connection,
//!   answers stray segments with resets, and schedules connections onto the
//!   transmit ring that [`Tcp::poll_transmit`] drains.
//! - [`Connection`] is the user-visible handle for a single connection:
//!   `send`, `read`, `wait_for_data`, and `close_write`.
//! - [`TcpListener`] is a bounded queue of connections accepted on a local
//!   port.
//! - [`Payload`] carries segment bytes through the send and receive paths
//!   without copying.
//!
//! The engine assumes single-shard ownership: a connection is only ever
//! touched by the shard that created it, and the embedder routes inbound
//! segments by the flow hash so that this holds.

pub mod neighbor;
pub mod payload;
pub mod tcp;
pub mod timer;
pub mod utility;

pub use neighbor::{EthernetAddress, L2Resolver, StaticNeighbors};
pub use payload::Payload;
pub use tcp::connection::Connection;
pub use tcp::listener::TcpListener;
pub use tcp::seq::SeqNum;
pub use tcp::{HwFeatures, Isn, OutboundPacket, Tcp, TcpError, DEFAULT_LISTEN_BACKLOG};
pub use utility::{ConnId, Endpoint};
