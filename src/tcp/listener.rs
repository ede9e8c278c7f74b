//! Listening sockets: a bounded queue of not-yet-accepted connections.

use super::connection::Connection;
use super::{StackShared, TcpError};
use std::sync::Weak;
use tokio::sync::mpsc;

/// A passive socket bound to a local port.
///
/// The demultiplexer pushes a [`Connection`] into the queue for every
/// accepted SYN; once the queue is full, further SYNs are refused with a
/// reset. Dropping the listener unbinds the port.
pub struct TcpListener {
    port: u16,
    queue: mpsc::Receiver<Connection>,
    stack: Weak<StackShared>,
}

impl TcpListener {
    pub(crate) fn new(
        port: u16,
        queue: mpsc::Receiver<Connection>,
        stack: Weak<StackShared>,
    ) -> Self {
        Self { port, queue, stack }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves with the next queued connection. Note that a connection is
    /// queued when its SYN is accepted, so the handshake may still be
    /// completing when this returns.
    pub async fn accept(&mut self) -> Result<Connection, TcpError> {
        self.queue.recv().await.ok_or(TcpError::Reset)
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        if let Some(stack) = self.stack.upgrade() {
            stack.unbind_listener(self.port);
        }
    }
}
