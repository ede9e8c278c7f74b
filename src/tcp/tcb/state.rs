//! Connection states and state-set membership tests.

use std::fmt::{self, Display};
use std::ops::BitOr;

/// The state of a TCP connection, per RFC 793 section 3.2.
///
/// Each state is a distinct bit so handlers can test membership in a set of
/// states with a single mask comparison, which is how most of the input
/// processing rules are phrased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum State {
    /// No connection state at all.
    Closed = 1 << 0,
    /// Waiting for a connection request from any remote TCP.
    Listen = 1 << 1,
    /// Waiting for a matching connection request after having sent a
    /// connection request.
    SynSent = 1 << 2,
    /// Waiting for a confirming connection request acknowledgment after
    /// having both received and sent a connection request.
    SynReceived = 1 << 3,
    /// An open connection; data received can be delivered to the user. The
    /// normal state for the data transfer phase of the connection.
    Established = 1 << 4,
    /// Waiting for a connection termination request from the remote TCP, or
    /// an acknowledgment of the connection termination request previously
    /// sent.
    FinWait1 = 1 << 5,
    /// Waiting for a connection termination request from the remote TCP.
    FinWait2 = 1 << 6,
    /// Waiting for a connection termination request from the local user.
    CloseWait = 1 << 7,
    /// Waiting for a connection termination request acknowledgment from the
    /// remote TCP.
    Closing = 1 << 8,
    /// Waiting for an acknowledgment of the connection termination request
    /// previously sent to the remote TCP.
    LastAck = 1 << 9,
    /// Waiting for enough time to pass to be sure the remote TCP received
    /// the acknowledgment of its connection termination request.
    TimeWait = 1 << 10,
}

impl State {
    /// Whether this state is a member of `set`.
    pub fn within(self, set: impl Into<StateSet>) -> bool {
        set.into().contains(self)
    }
}

impl Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN-SENT",
            State::SynReceived => "SYN-RECEIVED",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN-WAIT-1",
            State::FinWait2 => "FIN-WAIT-2",
            State::CloseWait => "CLOSE-WAIT",
            State::Closing => "CLOSING",
            State::LastAck => "LAST-ACK",
            State::TimeWait => "TIME-WAIT",
        };
        f.write_str(name)
    }
}

/// A set of states, formed with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSet(u16);

impl StateSet {
    pub fn contains(self, state: State) -> bool {
        self.0 & state as u16 != 0
    }
}

impl From<State> for StateSet {
    fn from(state: State) -> Self {
        StateSet(state as u16)
    }
}

impl BitOr for State {
    type Output = StateSet;

    fn bitor(self, rhs: State) -> StateSet {
        StateSet(self as u16 | rhs as u16)
    }
}

impl BitOr<State> for StateSet {
    type Output = StateSet;

    fn bitor(self, rhs: State) -> StateSet {
        StateSet(self.0 | rhs as u16)
    }
}
