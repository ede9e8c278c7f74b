//! The transmission control block: the per-connection protocol engine.
//!
//! A [`Tcb`] owns everything one connection needs: the RFC 793 state machine,
//! the send and receive sequence spaces, the congestion controller, the RTT
//! estimator, and the three one-shot timers. It is a plain synchronous state
//! machine; all waiting happens in [`TcbHandle`], which wraps the TCB in a
//! lock and exposes the async user operations over tokio primitives.
//!
//! Input enters through the three handlers ([`Tcb::input_listen`],
//! [`Tcb::input_syn_sent`], [`Tcb::input_other`]) and output leaves through
//! the pull side: `output` schedules the connection on the stack's transmit
//! ring, and the ring drains one segment at a time via [`TcbHandle::get_packet`].

pub mod reassembly;
pub mod state;

use self::reassembly::OutOfOrder;
use self::state::{State, StateSet};
use super::options::TcpOptions;
use super::seq::SeqNum;
use super::tcp_parsing::{ChecksumMode, TcpHeader, TcpHeaderBuilder, TCP_HDR_LEN_MIN};
use super::{HwFeatures, StackShared, TcpError};
use crate::payload::Payload;
use crate::timer::{earliest, OneShot};
use crate::utility::ConnId;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Minimum IPv4 header length, used when sizing payloads against the MTU.
const IP_HDR_LEN_MIN: usize = 20;

/// Retry bound shared by SYN, FIN, and data retransmission.
const MAX_NR_RETRANSMIT: u32 = 5;

const RTO_INIT: Duration = Duration::from_millis(1000);
const RTO_MIN: Duration = Duration::from_millis(1000);
const RTO_MAX: Duration = Duration::from_millis(60000);
/// Clock granularity `G` of the RFC 6298 RTO formula.
const RTO_CLK_GRANULARITY: Duration = Duration::from_millis(1);

/// RFC 1122 allows up to 500 ms; most implementations use 200 ms.
const DELAYED_ACK_DELAY: Duration = Duration::from_millis(200);

/// Linux's default receive window, scaled up by the window-scale shift.
const DEFAULT_RCV_WINDOW: u32 = 29200;

/// Byte credit limiting how much data `send` may queue ahead of transmission.
pub(crate) const USER_QUEUE_SPACE: usize = 212992;

/// Window scale we advertise on active opens.
const DEFAULT_LOCAL_WINDOW_SCALE: u8 = 7;

/// One TCP segment headed for the wire: a finished header plus its payload.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub header: TcpHeader,
    pub payload: Payload,
}

impl Segment {
    /// The sequence-space length of the segment, counting the SYN and FIN
    /// phantom bytes.
    pub fn seg_len(&self) -> u32 {
        self.payload.len() as u32 + self.header.ctl.syn() as u32 + self.header.ctl.fin() as u32
    }

    /// Serializes the segment into wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header.serialize();
        out.reserve(self.payload.len());
        for chunk in self.payload.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }
}

/// A transmitted but unacknowledged segment on the retransmission queue.
///
/// The stored segment is never rewritten: a partial ACK only decrements
/// `data_remaining`, and a retransmission resends the whole original
/// segment. This avoids rebuilding headers at the cost of occasionally
/// retransmitting bytes the peer already has.
#[derive(Debug)]
struct UnackedSegment {
    segment: Segment,
    data_len: u32,
    data_remaining: u32,
    nr_transmits: u32,
    tx_time: Instant,
}

/// The send sequence space and everything hanging off it.
#[derive(Debug)]
pub(crate) struct SendSequenceSpace {
    /// SND.UNA
    pub unacknowledged: SeqNum,
    /// SND.NXT
    pub next: SeqNum,
    /// SND.WND, already scaled
    pub window: u32,
    /// The peer's advertised window-scale shift
    pub window_scale: u8,
    /// The peer's MSS
    pub mss: u16,
    /// Segment sequence number used for the last window update
    pub wl1: SeqNum,
    /// Segment acknowledgment number used for the last window update
    pub wl2: SeqNum,
    /// ISS
    pub initial: SeqNum,
    /// NewReno recovery marker
    pub recover: SeqNum,
    /// Retransmission queue
    data: VecDeque<UnackedSegment>,
    /// User payloads not yet segmentized
    unsent: VecDeque<Payload>,
    pub unsent_len: u32,
    /// Bytes admitted into `send` but still waiting on queue-space credit
    pub queued_len: u32,
    /// The local user requested a FIN
    pub closed: bool,
    /// Round-trip time variation
    rttvar: Duration,
    /// Smoothed round-trip time
    srtt: Duration,
    first_rto_sample: bool,
    syn_tx_time: Option<Instant>,
    /// Congestion window
    pub cwnd: u32,
    /// Slow-start threshold
    pub ssthresh: u32,
    /// Consecutive duplicate ACKs observed
    pub dupacks: u16,
    syn_retransmit: u32,
    fin_retransmit: u32,
    /// Bytes sent under RFC 3042 limited transmit
    pub limited_transfer: u32,
    /// Partial ACKs seen in the current fast-recovery episode
    partial_ack: u32,
    /// The next `output_one` builds a one-byte zero-window probe
    window_probe: bool,
}

impl Default for SendSequenceSpace {
    fn default() -> Self {
        Self {
            unacknowledged: SeqNum(0),
            next: SeqNum(0),
            window: 0,
            window_scale: 0,
            mss: super::options::DEFAULT_REMOTE_MSS,
            wl1: SeqNum(0),
            wl2: SeqNum(0),
            initial: SeqNum(0),
            recover: SeqNum(0),
            data: VecDeque::new(),
            unsent: VecDeque::new(),
            unsent_len: 0,
            queued_len: 0,
            closed: false,
            rttvar: Duration::ZERO,
            srtt: Duration::ZERO,
            first_rto_sample: true,
            syn_tx_time: None,
            cwnd: 0,
            ssthresh: 0,
            dupacks: 0,
            syn_retransmit: 0,
            fin_retransmit: 0,
            limited_transfer: 0,
            partial_ack: 0,
            window_probe: false,
        }
    }
}

/// The receive sequence space.
#[derive(Debug)]
pub(crate) struct ReceiveSequenceSpace {
    /// RCV.NXT
    pub next: SeqNum,
    /// RCV.WND, already scaled
    pub window: u32,
    /// Our window-scale shift
    pub window_scale: u8,
    /// Our MSS
    pub mss: u16,
    /// IRS
    pub initial: SeqNum,
    /// In-order data buffered for the user
    data: VecDeque<Payload>,
    out_of_order: OutOfOrder,
}

impl Default for ReceiveSequenceSpace {
    fn default() -> Self {
        Self {
            next: SeqNum(0),
            window: 0,
            window_scale: 0,
            mss: 0,
            initial: SeqNum(0),
            data: VecDeque::new(),
            out_of_order: OutOfOrder::default(),
        }
    }
}

/// The per-connection protocol engine.
pub(crate) struct Tcb {
    id: ConnId,
    hw: HwFeatures,
    iss: SeqNum,
    state: State,
    pub(crate) snd: SendSequenceSpace,
    pub(crate) rcv: ReceiveSequenceSpace,
    options: TcpOptions,
    rto: Duration,
    persist_time_out: Duration,
    retransmit: OneShot,
    persist: OneShot,
    delayed_ack: OneShot,
    /// Full-sized segments received since the last immediate ACK; every
    /// second one forces an ACK per the delayed-ACK policy.
    nr_full_seg_received: u16,
    /// Outbound segments built by `output_one`, drained by `get_packet`.
    packetq: VecDeque<Segment>,
    /// Whether this connection is already on the stack's transmit ring.
    poll_active: bool,
    /// `close_write` was called but data is still in flight.
    close_requested: bool,
    cleaned_up: bool,
    pub(crate) error: Option<TcpError>,
    /// Zero point for timestamp option values.
    epoch: Instant,
    connect_done: Option<oneshot::Sender<Result<(), TcpError>>>,
    stack: Weak<StackShared>,
    me: Weak<TcbHandle>,
    data_received: Arc<Notify>,
    all_data_acked: Arc<Notify>,
    timer_changed: Arc<Notify>,
    user_queue_space: Arc<Semaphore>,
}

impl Tcb {
    pub(crate) fn state(&self) -> State {
        self.state
    }

    fn in_state(&self, set: impl Into<StateSet>) -> bool {
        self.state.within(set)
    }

    fn syn_needs_on(&self) -> bool {
        self.in_state(State::SynSent | State::SynReceived)
    }

    fn fin_needs_on(&self) -> bool {
        self.in_state(State::FinWait1 | State::Closing | State::LastAck)
            && self.snd.closed
            && self.snd.unsent_len == 0
            && self.snd.queued_len == 0
    }

    fn ack_needs_on(&self) -> bool {
        !self.in_state(State::Closed | State::Listen | State::SynSent)
    }

    pub(crate) fn foreign_will_not_send(&self) -> bool {
        self.in_state(
            State::Closing | State::TimeWait | State::CloseWait | State::LastAck | State::Closed,
        )
    }

    fn exit_fast_recovery(&mut self) {
        self.snd.dupacks = 0;
        self.snd.limited_transfer = 0;
        self.snd.partial_ack = 0;
    }

    fn flight_size(&self) -> u32 {
        self.snd.data.iter().map(|seg| seg.data_remaining).sum()
    }

    fn local_mss(&self) -> u16 {
        self.hw.mtu - (TCP_HDR_LEN_MIN + IP_HDR_LEN_MIN) as u16
    }

    fn ts_val(&self) -> u32 {
        (Instant::now() - self.epoch).as_millis() as u32
    }

    // ---- connection setup ----------------------------------------------

    fn setup_isn_state(&mut self) {
        self.snd.initial = self.iss;
        self.snd.unacknowledged = self.snd.initial;
        self.snd.next = self.snd.initial + 1;
        self.snd.recover = self.snd.initial;
    }

    /// Active open: select the ISN, pick our receive parameters, and send the
    /// SYN.
    pub(crate) fn connect(&mut self) {
        self.setup_isn_state();

        self.options.local_win_scale = DEFAULT_LOCAL_WINDOW_SCALE;
        self.rcv.window_scale = DEFAULT_LOCAL_WINDOW_SCALE;
        self.options.local_mss = self.local_mss();
        self.rcv.mss = self.options.local_mss;
        self.rcv.window = DEFAULT_RCV_WINDOW << self.rcv.window_scale;

        self.do_syn_sent();
    }

    fn do_syn_sent(&mut self) {
        self.state = State::SynSent;
        self.snd.syn_tx_time = Some(Instant::now());
        self.output();
    }

    fn do_syn_received(&mut self) {
        self.state = State::SynReceived;
        self.snd.syn_tx_time = Some(Instant::now());
        self.output();
    }

    fn do_established(&mut self) {
        self.state = State::Established;
        if let Some(syn_tx_time) = self.snd.syn_tx_time {
            self.update_rto(syn_tx_time);
        }
        if let Some(done) = self.connect_done.take() {
            let _ = done.send(Ok(()));
        }
    }

    fn do_local_fin_acked(&mut self) {
        self.snd.unacknowledged += 1;
        self.snd.next += 1;
    }

    fn do_reset(&mut self) {
        trace!(id = %self.id, state = %self.state, "connection reset");
        self.state = State::Closed;
        if self.error.is_none() {
            self.error = Some(TcpError::Reset);
        }
        self.cleanup();
    }

    fn do_time_wait(&mut self) {
        // The 2*MSL timer is deliberately absent: the state is entered and
        // the connection torn down in the same step.
        self.state = State::TimeWait;
        self.cleanup();
    }

    fn do_closed(&mut self) {
        self.state = State::Closed;
        self.cleanup();
    }

    /// Tears the connection down: flushes every queue, cancels the timers,
    /// breaks all waiters, and removes the table entry. After this the TCB is
    /// only reachable through handles that already existed.
    fn cleanup(&mut self) {
        self.snd.unsent.clear();
        self.snd.unsent_len = 0;
        self.snd.data.clear();
        self.rcv.out_of_order.clear();
        self.rcv.data.clear();
        self.stop_retransmit_timer();
        self.stop_persist_timer();
        self.clear_delayed_ack();
        self.cleaned_up = true;
        self.user_queue_space.close();
        if let Some(done) = self.connect_done.take() {
            let _ = done.send(Err(self.error.unwrap_or(TcpError::Reset)));
        }
        self.data_received.notify_waiters();
        self.all_data_acked.notify_waiters();
        self.timer_changed.notify_waiters();
        if let Some(stack) = self.stack.upgrade() {
            stack.remove_tcb(&self.id);
        }
    }

    pub(crate) fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    // ---- option negotiation --------------------------------------------

    fn init_from_options(&mut self, th: &TcpHeader) {
        self.options.parse(&th.options, true);

        self.snd.window_scale = self.options.remote_win_scale;
        self.rcv.window_scale = self.options.local_win_scale;

        self.snd.mss = self.options.remote_mss;
        self.options.local_mss = self.local_mss();
        self.rcv.mss = self.options.local_mss;

        self.rcv.window = DEFAULT_RCV_WINDOW << self.rcv.window_scale;
        self.snd.window = u32::from(th.window) << self.snd.window_scale;

        self.snd.wl1 = th.seq;
        self.snd.wl2 = th.ack;

        // RFC 6928 initial congestion window by MSS bucket.
        let smss = u32::from(self.snd.mss);
        self.snd.cwnd = if smss > 2190 {
            2 * smss
        } else if smss > 1095 {
            3 * smss
        } else {
            4 * smss
        };

        // Seeded from the peer's first advertised window rather than the
        // RFC 5681 initial value.
        self.snd.ssthresh = u32::from(th.window) << self.snd.window_scale;
    }

    // ---- input handlers ------------------------------------------------

    /// First segment of a passive open: the SYN that created this TCB.
    pub(crate) fn input_listen(&mut self, th: &TcpHeader) {
        self.rcv.next = th.seq + 1;
        self.rcv.initial = th.seq;
        self.rcv.out_of_order = OutOfOrder::new(self.rcv.initial);

        // SND.NXT starts at ISS+1 right away; `output_one` picks ISS for the
        // SYN-ACK itself so retransmitted SYNs keep the correct sequence.
        self.setup_isn_state();

        trace!(id = %self.id, "LISTEN -> SYN-RECEIVED");
        self.init_from_options(th);
        self.do_syn_received();
    }

    pub(crate) fn input_syn_sent(&mut self, th: &TcpHeader) {
        let seg_seq = th.seq;
        let seg_ack = th.ack;

        // First check the ACK bit.
        let mut acceptable = false;
        if th.ctl.ack() {
            if seg_ack <= self.snd.initial || seg_ack > self.snd.next {
                return self.respond_with_reset(th);
            }
            acceptable = self.snd.unacknowledged <= seg_ack && seg_ack <= self.snd.next;
        }

        // Second check the RST bit.
        if th.ctl.rst() {
            if acceptable {
                self.do_reset();
            }
            return;
        }

        // Fourth check the SYN bit.
        if th.ctl.syn() {
            self.rcv.next = seg_seq + 1;
            self.rcv.initial = seg_seq;
            self.rcv.out_of_order = OutOfOrder::new(self.rcv.initial);
            if th.ctl.ack() {
                self.snd.unacknowledged = seg_ack;
            }
            if self.snd.unacknowledged > self.snd.initial {
                // Our SYN has been ACKed.
                trace!(id = %self.id, "SYN-SENT -> ESTABLISHED");
                self.init_from_options(th);
                self.do_established();
                self.output();
            } else {
                // Simultaneous open; reply with a SYN-ACK. The peer's SYN
                // carried its options, so adopt them here just as the
                // passive-open path does.
                trace!(id = %self.id, "SYN-SENT -> SYN-RECEIVED");
                self.init_from_options(th);
                self.do_syn_received();
            }
        }

        // Fifth: neither SYN nor RST set, drop the segment.
    }

    /// Input processing for every synchronized state.
    pub(crate) fn input_other(&mut self, th: &TcpHeader, mut payload: Payload) {
        let mut do_output = false;
        let mut do_output_data = false;
        let mut seg_seq = th.seq;
        let seg_ack = th.ack;
        let mut seg_len = payload.len() as u32;
        let mut fin = th.ctl.fin();

        // First check the sequence number.
        if !self.segment_acceptable(seg_seq, seg_len) {
            // <SEQ=SND.NXT><ACK=RCV.NXT><CTL=ACK>
            return self.output();
        }

        // Trim the already-acknowledged prefix so the segment is the
        // idealized one beginning at RCV.NXT.
        if seg_seq < self.rcv.next {
            let dup = ((self.rcv.next - seg_seq) as u32).min(seg_len);
            payload.trim_front(dup as usize);
            seg_len -= dup;
            seg_seq += dup;
        }
        // And trim data past the right edge of the window; a FIN out there
        // cannot be acted on either.
        if seg_len > 0 {
            let allowed = (self.rcv.next + self.rcv.window) - seg_seq;
            if (allowed as u32) < seg_len {
                payload.truncate(allowed as usize);
                seg_len = allowed as u32;
                fin = false;
            }
        }

        if seg_seq != self.rcv.next {
            self.rcv.out_of_order.insert(seg_seq, payload);
            // An out-of-order segment gets an immediate duplicate ACK.
            return self.output();
        }

        // Second check the RST bit.
        if th.ctl.rst() {
            if self.in_state(State::SynReceived) {
                // A passive open simply dies; an active open that reached
                // SYN-RECEIVED was refused.
                if let Some(done) = self.connect_done.take() {
                    let _ = done.send(Err(TcpError::Refused));
                    self.error = Some(TcpError::Refused);
                }
                return self.do_reset();
            }
            if self.in_state(
                State::Established | State::FinWait1 | State::FinWait2 | State::CloseWait,
            ) {
                return self.do_reset();
            }
            if self.in_state(State::Closing | State::LastAck | State::TimeWait) {
                return self.do_closed();
            }
        }

        // Fourth check the SYN bit: a SYN in the window is an error.
        if th.ctl.syn() {
            self.respond_with_reset(th);
            return self.do_reset();
        }

        // Fifth check the ACK field.
        if !th.ctl.ack() {
            return;
        }
        if self.in_state(State::SynReceived) {
            if self.snd.unacknowledged <= seg_ack && seg_ack <= self.snd.next {
                trace!(id = %self.id, "SYN-RECEIVED -> ESTABLISHED");
                self.do_established();
            } else {
                // <SEQ=SEG.ACK><CTL=RST>
                return self.respond_with_reset(th);
            }
        }
        if self.in_state(State::Established | State::CloseWait) {
            if self.snd.unacknowledged < seg_ack && seg_ack <= self.snd.next {
                // The peer ACKed data we sent.
                let acked_bytes = self.data_segment_acked(seg_ack);

                if self.snd.wl1 < seg_seq || (self.snd.wl1 == seg_seq && self.snd.wl2 <= seg_ack) {
                    self.update_window(th, seg_seq, seg_ack);
                }

                // Something was acked; try to send more.
                do_output_data = true;

                if self.snd.dupacks >= 3 {
                    // Fast retransmit / fast recovery is in progress.
                    let smss = u32::from(self.snd.mss);
                    if seg_ack > self.snd.recover {
                        trace!(id = %self.id, "full ACK, leaving fast recovery");
                        // cwnd = min(ssthresh, max(FlightSize, SMSS) + SMSS)
                        self.snd.cwnd = self
                            .snd
                            .ssthresh
                            .min(self.flight_size().max(smss) + smss);
                        self.exit_fast_recovery();
                        self.restart_or_stop_retransmit();
                    } else {
                        trace!(id = %self.id, "partial ACK");
                        // Retransmit the first unacknowledged segment and
                        // deflate cwnd by the newly acknowledged amount.
                        self.fast_retransmit();
                        self.snd.cwnd -= acked_bytes;
                        // A partial ACK covering at least one SMSS earns the
                        // window one SMSS back.
                        if acked_bytes >= smss {
                            self.snd.cwnd += smss;
                        }
                        // The first partial ACK of an episode restarts the
                        // retransmit timer.
                        self.snd.partial_ack += 1;
                        if self.snd.partial_ack == 1 {
                            self.start_retransmit_timer(Instant::now());
                        }
                    }
                } else {
                    // This ACK moves SND.UNA, so the duplicate-ACK count
                    // starts over.
                    self.exit_fast_recovery();
                    self.restart_or_stop_retransmit();
                }
            } else if !self.snd.data.is_empty()
                && seg_len == 0
                && !th.ctl.fin()
                && !th.ctl.syn()
                && seg_ack == self.snd.unacknowledged
                && u32::from(th.window) << self.snd.window_scale == self.snd.window
            {
                // RFC 793 would ignore a duplicate ACK; RFC 5681 counts it
                // toward fast retransmit instead.
                self.snd.dupacks += 1;
                let smss = u32::from(self.snd.mss);
                if self.snd.dupacks == 1 || self.snd.dupacks == 2 {
                    // RFC 3042 limited transmit: `can_send` allows up to
                    // cwnd + 2*SMSS in flight.
                    do_output_data = true;
                } else if self.snd.dupacks == 3 {
                    // RFC 6582 step 2: only enter fast retransmit if the
                    // cumulative ACK covers more than `recover`.
                    if seg_ack - 1 > self.snd.recover {
                        self.snd.recover = self.snd.next - 1;
                        self.snd.ssthresh =
                            ((self.flight_size() - self.snd.limited_transfer) / 2).max(2 * smss);
                        self.fast_retransmit();
                    }
                    self.snd.cwnd = self.snd.ssthresh + 3 * smss;
                } else if self.snd.dupacks > 3 {
                    self.snd.cwnd += smss;
                    do_output_data = true;
                }
            } else if seg_ack > self.snd.next {
                // An ACK for something not yet sent: ACK back and drop.
                return self.output();
            } else if self.snd.window == 0 && th.window > 0 {
                self.update_window(th, seg_seq, seg_ack);
                do_output_data = true;
            }
        }
        if self.in_state(State::FinWait1) {
            if seg_ack == self.snd.next + 1 {
                trace!(id = %self.id, "FIN-WAIT-1 -> FIN-WAIT-2");
                self.state = State::FinWait2;
                self.do_local_fin_acked();
            }
        }
        if self.in_state(State::Closing) {
            if seg_ack == self.snd.next + 1 {
                trace!(id = %self.id, "CLOSING -> TIME-WAIT");
                self.do_local_fin_acked();
                return self.do_time_wait();
            }
            return;
        }
        if self.in_state(State::LastAck) && seg_ack == self.snd.next + 1 {
            trace!(id = %self.id, "LAST-ACK -> CLOSED");
            self.do_local_fin_acked();
            return self.do_closed();
        }

        // Sixth, the URG bit: urgent data is not processed.

        // Seventh, process the segment text.
        if self.in_state(State::Established | State::FinWait1 | State::FinWait2) {
            if !payload.is_empty() {
                self.rcv.data.push_back(payload);
                self.rcv.next += seg_len;
                let merged = self.merge_out_of_order();
                self.signal_data_received();
                if merged {
                    // Filling a gap deserves an immediate ACK.
                    do_output = true;
                } else {
                    do_output = self.should_send_ack(seg_len);
                }
            }
        } else if self.in_state(
            State::CloseWait | State::Closing | State::LastAck | State::TimeWait,
        ) {
            // A FIN already arrived from the peer; text here is bogus.
            return;
        }

        // Eighth, check the FIN bit.
        if fin {
            if self.in_state(State::Closed | State::Listen | State::SynSent) {
                return;
            }
            let fin_seq = seg_seq + seg_len;
            if fin_seq == self.rcv.next {
                self.rcv.next = fin_seq + 1;
                self.signal_data_received();

                // Any data in this segment rides on the FIN's ACK.
                self.clear_delayed_ack();
                do_output = false;
                self.output();

                if self.in_state(State::SynReceived | State::Established) {
                    trace!(id = %self.id, state = %self.state, "-> CLOSE-WAIT");
                    self.state = State::CloseWait;
                }
                if self.in_state(State::FinWait1) {
                    // Were our FIN already acknowledged we would be in
                    // FIN-WAIT-2 by now.
                    trace!(id = %self.id, "FIN-WAIT-1 -> CLOSING");
                    self.state = State::Closing;
                }
                if self.in_state(State::FinWait2) {
                    trace!(id = %self.id, "FIN-WAIT-2 -> TIME-WAIT");
                    return self.do_time_wait();
                }
            }
        }

        if do_output || (do_output_data && self.can_send() > 0) {
            // The outgoing segment carries the ACK; drop the delayed one.
            self.clear_delayed_ack();
            self.output();
        }
    }

    /// RFC 793 sequence acceptability test against the receive window.
    fn segment_acceptable(&self, seg_seq: SeqNum, seg_len: u32) -> bool {
        if seg_len == 0 && self.rcv.window == 0 {
            seg_seq == self.rcv.next
        } else if seg_len == 0 {
            self.rcv.next <= seg_seq && seg_seq < self.rcv.next + self.rcv.window
        } else if self.rcv.window > 0 {
            let last = seg_seq + seg_len - 1;
            let first_in = self.rcv.next <= seg_seq && seg_seq < self.rcv.next + self.rcv.window;
            let last_in = self.rcv.next <= last && last < self.rcv.next + self.rcv.window;
            first_in || last_in
        } else {
            false
        }
    }

    /// Consumes acknowledged segments from the head of the retransmission
    /// queue and returns how many bytes the ACK covered.
    fn data_segment_acked(&mut self, seg_ack: SeqNum) -> u32 {
        let mut total_acked_bytes = 0;
        // Fully acknowledged segments.
        loop {
            let Some(front) = self.snd.data.front() else { break };
            if !(self.snd.unacknowledged + front.data_remaining <= seg_ack) {
                break;
            }
            let acked_bytes = front.data_remaining;
            let fresh = front.nr_transmits == 0;
            let tx_time = front.tx_time;
            let data_len = front.data_len;
            self.snd.data.pop_front();
            self.snd.unacknowledged += acked_bytes;
            // Retransmitted segments carry no usable RTT sample.
            if fresh {
                self.update_rto(tx_time);
            }
            self.update_cwnd(acked_bytes);
            total_acked_bytes += acked_bytes;
            self.user_queue_space.add_permits(data_len as usize);
        }
        // A partial ACK of the head segment. The stored payload is left
        // untouched so a retransmission resends the original segment.
        if self.snd.unacknowledged < seg_ack {
            let acked_bytes = (seg_ack - self.snd.unacknowledged) as u32;
            if let Some(front) = self.snd.data.front_mut() {
                front.data_remaining -= acked_bytes;
            }
            self.snd.unacknowledged = seg_ack;
            self.update_cwnd(acked_bytes);
            total_acked_bytes += acked_bytes;
        }
        total_acked_bytes
    }

    fn update_window(&mut self, th: &TcpHeader, seg_seq: SeqNum, seg_ack: SeqNum) {
        trace!(
            id = %self.id,
            old = self.snd.window,
            new = u32::from(th.window) << self.snd.window_scale,
            "window update",
        );
        self.snd.window = u32::from(th.window) << self.snd.window_scale;
        self.snd.wl1 = seg_seq;
        self.snd.wl2 = seg_ack;
        if self.snd.window == 0 {
            self.persist_time_out = self.rto;
            self.start_persist_timer(Instant::now());
        } else {
            self.stop_persist_timer();
        }
    }

    fn restart_or_stop_retransmit(&mut self) {
        if self.snd.data.is_empty() {
            // Everything outstanding is acknowledged.
            self.stop_retransmit_timer();
            self.signal_all_data_acked();
        } else {
            self.start_retransmit_timer(Instant::now());
        }
    }

    // ---- receive side ---------------------------------------------------

    fn merge_out_of_order(&mut self) -> bool {
        let (delivered, next, merged) = self.rcv.out_of_order.pop_in_order(self.rcv.next);
        self.rcv.data.extend(delivered);
        self.rcv.next = next;
        merged
    }

    /// Atomically drains the receive buffer.
    pub(crate) fn read(&mut self) -> Payload {
        let mut out = Payload::default();
        for part in self.rcv.data.drain(..) {
            out.append(part);
        }
        out
    }

    pub(crate) fn has_buffered_data(&self) -> bool {
        !self.rcv.data.is_empty()
    }

    fn signal_data_received(&self) {
        self.data_received.notify_waiters();
    }

    fn signal_all_data_acked(&mut self) {
        if self.snd.data.is_empty() && self.snd.unsent_len == 0 && self.snd.queued_len == 0 {
            self.all_data_acked.notify_waiters();
            self.maybe_fire_close();
        }
    }

    /// The delayed-ACK decision for an in-order data segment of `seg_len`
    /// bytes. Returns whether to ACK right now.
    fn should_send_ack(&mut self, seg_len: u32) -> bool {
        // A TSO-merged super-segment gets an immediate ACK.
        if seg_len > u32::from(self.rcv.mss) {
            self.nr_full_seg_received = 0;
            self.delayed_ack.cancel();
            return true;
        }

        // Every second full-sized segment is ACKed immediately.
        if seg_len == u32::from(self.rcv.mss) {
            self.nr_full_seg_received += 1;
            if self.nr_full_seg_received >= 2 {
                self.nr_full_seg_received = 0;
                self.delayed_ack.cancel();
                return true;
            }
        }

        // Arming is idempotent while an earlier delayed ACK is pending.
        self.delayed_ack.arm_if_idle(Instant::now() + DELAYED_ACK_DELAY);
        false
    }

    fn clear_delayed_ack(&mut self) {
        self.delayed_ack.cancel();
    }

    // ---- close ----------------------------------------------------------

    /// The user asked for a graceful close of the write side. The FIN is
    /// armed as soon as everything queued has been acknowledged.
    pub(crate) fn close_write(&mut self) {
        if self.in_state(State::Closed) || self.snd.closed || self.close_requested {
            return;
        }
        self.close_requested = true;
        self.maybe_fire_close();
    }

    fn maybe_fire_close(&mut self) {
        if !self.close_requested || self.snd.closed || self.in_state(State::Closed) {
            return;
        }
        if !self.snd.data.is_empty() || self.snd.unsent_len != 0 || self.snd.queued_len != 0 {
            return;
        }
        self.snd.closed = true;
        if self.in_state(State::CloseWait) {
            trace!(id = %self.id, "CLOSE-WAIT -> LAST-ACK");
            self.state = State::LastAck;
        } else if self.in_state(State::Established) {
            trace!(id = %self.id, "ESTABLISHED -> FIN-WAIT-1");
            self.state = State::FinWait1;
        }
        // Build the FIN-bearing segment right away: a pure ACK already
        // sitting in the packet queue would otherwise satisfy the next poll
        // without carrying the FIN.
        self.output_one();
        self.output();
    }

    // ---- output pipeline -------------------------------------------------

    /// The byte budget for the next data segment.
    fn can_send(&mut self) -> u32 {
        if self.snd.window_probe {
            return 1;
        }
        // No more than the advertised window allows...
        let window_avail = ((self.snd.unacknowledged + self.snd.window) - self.snd.next).max(0);
        let mut budget = (window_avail as u32).min(self.snd.unsent_len);
        // ...and no more than the congestion window allows.
        budget = budget.min(self.snd.cwnd);
        if self.snd.dupacks == 1 || self.snd.dupacks == 2 {
            // RFC 3042 limited transmit: cwnd + 2*SMSS total in flight.
            let flight = self.flight_size();
            let max = self.snd.cwnd + 2 * u32::from(self.snd.mss);
            budget = if flight <= max {
                budget.min(max - flight)
            } else {
                0
            };
            self.snd.limited_transfer += budget;
        } else if self.snd.dupacks >= 3 {
            // In fast recovery, at most one full-sized segment per ACK.
            budget = budget.min(u32::from(self.snd.mss));
        }
        budget
    }

    /// Builds the payload for the next segment from the unsent queue,
    /// coalescing small writes and splitting large ones.
    fn get_transmit_packet(&mut self) -> Payload {
        if self.snd.unsent.is_empty() {
            return Payload::default();
        }
        let mut budget = self.can_send();
        let headers = (TCP_HDR_LEN_MIN + IP_HDR_LEN_MIN) as u32;
        let effective_mss = if self.hw.tx_tso {
            self.hw.max_packet_len.saturating_sub(headers)
        } else {
            (u32::from(self.hw.mtu).saturating_sub(headers)).min(u32::from(self.snd.mss))
        };
        budget = budget.min(effective_mss);

        // Easy case: a single small packet.
        if self.snd.unsent.len() == 1
            && self
                .snd
                .unsent
                .front()
                .is_some_and(|p| p.len() as u32 <= budget)
        {
            let Some(payload) = self.snd.unsent.pop_front() else {
                return Payload::default();
            };
            self.snd.unsent_len -= payload.len() as u32;
            return payload;
        }
        // Moderate case: split the head in place.
        if self
            .snd
            .unsent
            .front()
            .is_some_and(|p| p.len() as u32 > budget)
        {
            let Some(front) = self.snd.unsent.front_mut() else {
                return Payload::default();
            };
            let payload = front.split_front(budget as usize);
            self.snd.unsent_len -= payload.len() as u32;
            return payload;
        }
        // Hard case: coalesce whole packets, possibly splitting the last.
        let Some(mut payload) = self.snd.unsent.pop_front() else {
            return Payload::default();
        };
        budget -= payload.len() as u32;
        while self
            .snd
            .unsent
            .front()
            .is_some_and(|p| p.len() as u32 <= budget)
        {
            let Some(part) = self.snd.unsent.pop_front() else {
                break;
            };
            budget -= part.len() as u32;
            payload.append(part);
        }
        if budget > 0 {
            if let Some(front) = self.snd.unsent.front_mut() {
                payload.append(front.split_front(budget as usize));
            }
        }
        self.snd.unsent_len -= payload.len() as u32;
        payload
    }

    /// Builds exactly one outbound segment and queues it for the pull hook.
    pub(crate) fn output_one(&mut self) {
        if self.in_state(State::Closed) {
            return;
        }

        let payload = self.get_transmit_packet();
        let len = payload.len() as u32;
        let syn_on = self.syn_needs_on();
        let ack_on = self.ack_needs_on();
        let fin_on = self.fin_needs_on();
        if ack_on {
            self.clear_delayed_ack();
        }

        let seq = if syn_on {
            self.snd.initial
        } else {
            self.snd.next
        };
        let window = (self.rcv.window >> self.rcv.window_scale).min(u32::from(u16::MAX)) as u16;
        let mut builder =
            TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, seq).window(window);
        if syn_on {
            builder = builder.syn();
        }
        if ack_on {
            builder = builder.ack(self.rcv.next);
        }
        if fin_on {
            builder = builder.fin();
        }
        builder = builder.options(self.options.fill(syn_on, self.ts_val()));

        let mode = if self.hw.tx_csum_offload {
            ChecksumMode::Offloaded
        } else {
            ChecksumMode::Software
        };
        let header = builder.build(self.id.local.address, self.id.remote.address, &payload, mode);

        self.snd.next += len;

        let segment = Segment { header, payload };
        if len > 0 || syn_on || fin_on {
            let now = Instant::now();
            if len > 0 {
                self.snd.data.push_back(UnackedSegment {
                    segment: segment.clone(),
                    data_len: len,
                    data_remaining: len,
                    nr_transmits: 0,
                    tx_time: now,
                });
            }
            if !self.retransmit.armed() {
                self.start_retransmit_timer(now);
            }
        }

        self.packetq.push_back(segment);
    }

    /// Schedules this connection on the stack's transmit ring. Idempotent
    /// while a poll is pending.
    pub(crate) fn output(&mut self) {
        if !self.poll_active {
            self.poll_active = true;
            if let (Some(stack), Some(me)) = (self.stack.upgrade(), self.me.upgrade()) {
                stack.poll_tcb(me);
            }
        }
    }

    /// The pull side: hands one segment to the packet provider and decides
    /// whether to stay on the transmit ring.
    pub(crate) fn get_packet(&mut self) -> Option<Segment> {
        self.poll_active = false;
        if self.packetq.is_empty() {
            self.output_one();
        }

        if self.in_state(State::Closed) {
            return None;
        }

        let packet = self.packetq.pop_front()?;
        if !self.packetq.is_empty() || (self.snd.dupacks < 3 && self.can_send() > 0) {
            // More to send, unless three duplicate ACKs indicate a loss in
            // which case pushing more data only makes things worse.
            self.output();
        }
        Some(packet)
    }

    pub(crate) fn poll_scheduled(&self) -> bool {
        self.poll_active || !self.packetq.is_empty()
    }

    fn respond_with_reset(&mut self, th: &TcpHeader) {
        if let Some(stack) = self.stack.upgrade() {
            stack.respond_with_reset(th, self.id.local.address, self.id.remote.address);
        }
    }

    // ---- timers ---------------------------------------------------------

    fn start_retransmit_timer(&mut self, now: Instant) {
        self.retransmit.rearm(now + self.rto);
    }

    fn stop_retransmit_timer(&mut self) {
        self.retransmit.cancel();
    }

    fn start_persist_timer(&mut self, now: Instant) {
        self.persist.rearm(now + self.persist_time_out);
    }

    fn stop_persist_timer(&mut self) {
        self.persist.cancel();
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        earliest([
            self.retransmit.expires_at(),
            self.persist.expires_at(),
            self.delayed_ack.expires_at(),
        ])
    }

    /// Fires whichever timers have expired by `now`.
    pub(crate) fn handle_timers(&mut self, now: Instant) {
        if self.delayed_ack.take_expired(now) {
            self.nr_full_seg_received = 0;
            self.output();
        }
        if self.retransmit.take_expired(now) {
            self.retransmit_fired(now);
        }
        if self.persist.take_expired(now) {
            self.persist_fired(now);
        }
    }

    /// Zero-window probing: send one byte past the window and back off.
    fn persist_fired(&mut self, now: Instant) {
        debug!(id = %self.id, timeout = ?self.persist_time_out, "window probe");
        self.snd.window_probe = true;
        self.output_one();
        self.snd.window_probe = false;

        self.output();
        // Binary exponential back-off per RFC 1122.
        self.persist_time_out = (self.persist_time_out * 2).min(RTO_MAX);
        self.start_persist_timer(now);
    }

    fn output_and_backoff_rto(&mut self, now: Instant) {
        self.output();
        // RFC 6298 binary exponential back-off.
        self.rto = (self.rto * 2).min(RTO_MAX);
        self.start_retransmit_timer(now);
    }

    fn retransmit_fired(&mut self, now: Instant) {
        // A pending SYN first.
        if self.syn_needs_on() {
            if self.snd.syn_retransmit < MAX_NR_RETRANSMIT {
                self.snd.syn_retransmit += 1;
                self.output_and_backoff_rto(now);
            } else {
                debug!(id = %self.id, "handshake timed out");
                self.error = Some(TcpError::ConnectFailed);
                if let Some(done) = self.connect_done.take() {
                    let _ = done.send(Err(TcpError::ConnectFailed));
                }
                self.cleanup();
                return;
            }
        }

        // Then a pending FIN.
        if self.fin_needs_on() {
            if self.snd.fin_retransmit < MAX_NR_RETRANSMIT {
                self.snd.fin_retransmit += 1;
                self.output_and_backoff_rto(now);
            } else {
                debug!(id = %self.id, "FIN retransmit exhausted");
                self.cleanup();
                return;
            }
        }

        // Then data: retransmit the earliest outstanding segment.
        if self.snd.data.is_empty() {
            return;
        }

        let smss = u32::from(self.snd.mss);
        // RFC 5681: adjust ssthresh only on the first retransmission of the
        // segment.
        if self
            .snd
            .data
            .front()
            .is_some_and(|seg| seg.nr_transmits == 0)
        {
            self.snd.ssthresh = (self.flight_size() / 2).max(2 * smss);
        }
        // RFC 6582 step 4.
        self.snd.recover = self.snd.next - 1;
        // Restart slow start.
        self.snd.cwnd = smss;
        self.exit_fast_recovery();

        let resend = {
            let Some(front) = self.snd.data.front_mut() else {
                return;
            };
            if front.nr_transmits < MAX_NR_RETRANSMIT {
                front.nr_transmits += 1;
                Some(front.segment.clone())
            } else {
                None
            }
        };
        match resend {
            Some(segment) => {
                self.packetq.push_back(segment);
                self.output_and_backoff_rto(now);
            }
            None => {
                debug!(id = %self.id, "data retransmit exhausted");
                self.cleanup();
            }
        }
    }

    /// Resends the head of the retransmission queue without touching the
    /// timers, as fast retransmit and partial-ACK recovery require.
    fn fast_retransmit(&mut self) {
        let Some(front) = self.snd.data.front_mut() else {
            return;
        };
        front.nr_transmits += 1;
        let segment = front.segment.clone();
        self.packetq.push_back(segment);
        self.output();
    }

    /// RFC 6298 RTO update from one RTT sample.
    fn update_rto(&mut self, tx_time: Instant) {
        let r = Instant::now() - tx_time;
        if self.snd.first_rto_sample {
            self.snd.first_rto_sample = false;
            self.snd.rttvar = r / 2;
            self.snd.srtt = r;
        } else {
            // RTTVAR <- 3/4 * RTTVAR + 1/4 * |SRTT - R'|
            // SRTT   <- 7/8 * SRTT + 1/8 * R'
            let delta = if self.snd.srtt > r {
                self.snd.srtt - r
            } else {
                r - self.snd.srtt
            };
            self.snd.rttvar = self.snd.rttvar * 3 / 4 + delta / 4;
            self.snd.srtt = self.snd.srtt * 7 / 8 + r / 8;
        }
        // RTO <- SRTT + max(G, 4 * RTTVAR), clamped to [1s, 60s].
        self.rto = self.snd.srtt + (self.snd.rttvar * 4).max(RTO_CLK_GRANULARITY);
        self.rto = self.rto.clamp(RTO_MIN, RTO_MAX);
    }

    /// RFC 5681 congestion window growth on newly acknowledged data.
    fn update_cwnd(&mut self, acked_bytes: u32) {
        let smss = u32::from(self.snd.mss);
        if self.snd.cwnd < self.snd.ssthresh {
            // Slow start.
            self.snd.cwnd += acked_bytes.min(smss);
        } else {
            // Congestion avoidance.
            self.snd.cwnd += (smss * smss / self.snd.cwnd.max(1)).max(1);
        }
    }
}

/// The shared handle to one connection's TCB.
///
/// The TCB itself is synchronous; the handle owns the lock around it plus the
/// signalling primitives the async user operations wait on. The handle is
/// kept alive by the connection table, the accept queue, the user-visible
/// [`Connection`](crate::Connection), the transmit ring, and the timer
/// driver; teardown drops only the table reference.
pub(crate) struct TcbHandle {
    pub(crate) id: ConnId,
    tcb: Mutex<Tcb>,
    data_received: Arc<Notify>,
    all_data_acked: Arc<Notify>,
    pub(crate) timer_changed: Arc<Notify>,
    user_queue_space: Arc<Semaphore>,
    /// The resolved L2 next hop for this connection, filled on first use and
    /// attached to every pulled packet.
    pub(crate) l2_dst: Mutex<Option<crate::neighbor::EthernetAddress>>,
}

impl TcbHandle {
    pub(crate) fn new(
        id: ConnId,
        hw: HwFeatures,
        stack: Weak<StackShared>,
        iss: SeqNum,
    ) -> Arc<Self> {
        let data_received = Arc::new(Notify::new());
        let all_data_acked = Arc::new(Notify::new());
        let timer_changed = Arc::new(Notify::new());
        let user_queue_space = Arc::new(Semaphore::new(USER_QUEUE_SPACE));
        let handle = Arc::new(Self {
            id,
            tcb: Mutex::new(Tcb {
                id,
                hw,
                iss,
                state: State::Closed,
                snd: SendSequenceSpace::default(),
                rcv: ReceiveSequenceSpace::default(),
                options: TcpOptions::default(),
                rto: RTO_INIT,
                persist_time_out: RTO_INIT,
                retransmit: OneShot::new(),
                persist: OneShot::new(),
                delayed_ack: OneShot::new(),
                nr_full_seg_received: 0,
                packetq: VecDeque::new(),
                poll_active: false,
                close_requested: false,
                cleaned_up: false,
                error: None,
                epoch: Instant::now(),
                connect_done: None,
                stack,
                me: Weak::new(),
                data_received: data_received.clone(),
                all_data_acked: all_data_acked.clone(),
                timer_changed: timer_changed.clone(),
                user_queue_space: user_queue_space.clone(),
            }),
            data_received,
            all_data_acked,
            timer_changed,
            user_queue_space,
            l2_dst: Mutex::new(None),
        });
        handle.tcb.lock().unwrap().me = Arc::downgrade(&handle);
        handle
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tcb> {
        self.tcb.lock().unwrap()
    }

    /// Routes an inbound segment to the right input handler.
    pub(crate) fn input(&self, header: &TcpHeader, payload: Payload) {
        {
            let mut tcb = self.lock();
            if tcb.state() == State::SynSent {
                tcb.input_syn_sent(header);
            } else {
                tcb.input_other(header, payload);
            }
        }
        self.timer_changed.notify_one();
    }

    /// Runs the LISTEN-state handler on a TCB just created from a SYN.
    pub(crate) fn input_listen(&self, header: &TcpHeader) {
        self.lock().input_listen(header);
        self.timer_changed.notify_one();
    }

    /// Starts an active open and returns the handshake future's receiver.
    pub(crate) fn connect(&self) -> oneshot::Receiver<Result<(), TcpError>> {
        let (done, rx) = oneshot::channel();
        {
            let mut tcb = self.lock();
            tcb.connect_done = Some(done);
            tcb.connect();
        }
        self.timer_changed.notify_one();
        rx
    }

    /// Admits bytes into the send path, waiting for queue-space credit.
    pub(crate) async fn send(&self, payload: Payload) -> Result<(), TcpError> {
        let len = payload.len() as u32;
        {
            let mut tcb = self.lock();
            if tcb.in_state(State::Closed) {
                return Err(tcb.error.unwrap_or(TcpError::Reset));
            }
            debug_assert!(!tcb.snd.closed, "send after close_write");
            tcb.snd.queued_len += len;
        }
        match self.user_queue_space.acquire_many(len).await {
            Ok(permit) => permit.forget(),
            // The semaphore is closed when the connection dies.
            Err(_) => return Err(self.lock().error.unwrap_or(TcpError::Reset)),
        }
        {
            let mut tcb = self.lock();
            tcb.snd.queued_len -= len;
            tcb.snd.unsent_len += len;
            tcb.snd.unsent.push_back(payload);
            if tcb.can_send() > 0 {
                tcb.output();
            }
        }
        self.timer_changed.notify_one();
        Ok(())
    }

    /// Resolves once the receive buffer is non-empty or the peer can no
    /// longer send.
    pub(crate) async fn wait_for_data(&self) -> Result<(), TcpError> {
        loop {
            let notified = self.data_received.notified();
            tokio::pin!(notified);
            // Register before checking, so a signal arriving in between is
            // not lost.
            notified.as_mut().enable();
            {
                let tcb = self.lock();
                if tcb.has_buffered_data() {
                    return Ok(());
                }
                if let Some(error) = tcb.error {
                    return Err(error);
                }
                if tcb.foreign_will_not_send() {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Resolves once nothing remains queued, unsent, or unacknowledged.
    pub(crate) async fn wait_for_all_data_acked(&self) -> Result<(), TcpError> {
        loop {
            let notified = self.all_data_acked.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let tcb = self.lock();
                if tcb.snd.data.is_empty() && tcb.snd.unsent_len == 0 && tcb.snd.queued_len == 0 {
                    return Ok(());
                }
                if let Some(error) = tcb.error {
                    return Err(error);
                }
            }
            notified.await;
        }
    }

    pub(crate) fn read(&self) -> Payload {
        self.lock().read()
    }

    pub(crate) fn close_write(&self) {
        self.lock().close_write();
        self.timer_changed.notify_one();
    }

    pub(crate) fn state(&self) -> State {
        self.lock().state()
    }

    pub(crate) fn get_packet(&self) -> Option<Segment> {
        let packet = self.lock().get_packet();
        self.timer_changed.notify_one();
        packet
    }

    pub(crate) fn poll_scheduled(&self) -> bool {
        self.lock().poll_scheduled()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.lock().next_deadline()
    }

    pub(crate) fn handle_timers(&self) {
        self.lock().handle_timers(Instant::now());
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.lock().is_cleaned_up()
    }
}

/// Drives one connection's timers: sleeps until the earliest deadline,
/// re-evaluating whenever the connection's timers change, until teardown.
pub(crate) async fn drive(handle: Arc<TcbHandle>) {
    loop {
        if handle.is_finished() {
            break;
        }
        match handle.next_deadline() {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => handle.handle_timers(),
                    _ = handle.timer_changed.notified() => {}
                }
            }
            None => handle.timer_changed.notified().await,
        }
    }
}
