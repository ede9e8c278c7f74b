//! The user-visible handle for one established connection.

use super::tcb::TcbHandle;
use super::TcpError;
use crate::payload::Payload;
use crate::utility::Endpoint;
use std::sync::Arc;

/// One TCP connection as seen by the application.
///
/// The handle shares ownership of the connection state with the stack's
/// tables and timers; dropping it closes the write side gracefully (the FIN
/// goes out once everything queued is acknowledged) while the engine keeps
/// running the connection to completion in the background.
pub struct Connection {
    tcb: Arc<TcbHandle>,
}

impl Connection {
    pub(crate) fn new(tcb: Arc<TcbHandle>) -> Self {
        Self { tcb }
    }

    pub fn local_addr(&self) -> Endpoint {
        self.tcb.id.local
    }

    pub fn peer_addr(&self) -> Endpoint {
        self.tcb.id.remote
    }

    /// Admits bytes into the send path. Resolves once the bytes are queued
    /// for transmission, waiting for queue-space credit when the send buffer
    /// is full. Fails with [`TcpError::Reset`] when the connection is gone.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), TcpError> {
        self.tcb.send(payload.into()).await
    }

    /// Resolves when buffered data is available to [`read`](Self::read) or
    /// the peer will not send any more.
    pub async fn wait_for_data(&self) -> Result<(), TcpError> {
        self.tcb.wait_for_data().await
    }

    /// Atomically drains the receive buffer. Returns an empty payload when
    /// nothing is buffered.
    pub fn read(&self) -> Payload {
        self.tcb.read()
    }

    /// Resolves once every byte handed to [`send`](Self::send) has been
    /// acknowledged by the peer.
    pub async fn wait_for_all_data_acked(&self) -> Result<(), TcpError> {
        self.tcb.wait_for_all_data_acked().await
    }

    /// Schedules a graceful close of the write side: once all queued data is
    /// acknowledged, exactly one FIN is sent (with bounded retransmission).
    pub fn close_write(&self) {
        self.tcb.close_write();
    }

    /// Closes the read side. Nothing needs tearing down here: data already
    /// buffered simply dies with the handle.
    pub fn close_read(&self) {}
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close_read();
        self.close_write();
    }
}
