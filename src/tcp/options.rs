//! TCP option parsing, serialization, and per-connection negotiation state.
//!
//! The engine understands MSS, window scale, SACK-permitted, and timestamps.
//! SACK is advertised but never used to drive retransmission; timestamps are
//! round-tripped. Options are padded to a 32-bit boundary with NOPs.

const KIND_EOL: u8 = 0;
const KIND_NOP: u8 = 1;
const KIND_MSS: u8 = 2;
const KIND_WIN_SCALE: u8 = 3;
const KIND_SACK_PERMITTED: u8 = 4;
const KIND_TIMESTAMPS: u8 = 8;

const LEN_MSS: u8 = 4;
const LEN_WIN_SCALE: u8 = 3;
const LEN_SACK_PERMITTED: u8 = 2;
const LEN_TIMESTAMPS: u8 = 10;

/// The largest window scale we will apply, per RFC 7323's cap.
pub const MAX_WINDOW_SCALE: u8 = 14;

/// Default MSS assumed for a peer that does not advertise one.
pub const DEFAULT_REMOTE_MSS: u16 = 536;

/// Option negotiation state for one connection.
#[derive(Debug, Clone)]
pub struct TcpOptions {
    pub(crate) mss_received: bool,
    pub(crate) win_scale_received: bool,
    pub(crate) sack_received: bool,
    pub(crate) timestamps_received: bool,
    /// Whether we have seen the peer's SYN; distinguishes the initiator
    /// (which offers every option) from the responder (which echoes only
    /// what the peer offered).
    pub(crate) remote_syn_seen: bool,
    pub(crate) remote_mss: u16,
    pub(crate) local_mss: u16,
    pub(crate) remote_win_scale: u8,
    pub(crate) local_win_scale: u8,
    /// The peer's most recent timestamp value, echoed in our TSecr.
    pub(crate) echo_ts_val: u32,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            mss_received: false,
            win_scale_received: false,
            sack_received: false,
            timestamps_received: false,
            remote_syn_seen: false,
            remote_mss: DEFAULT_REMOTE_MSS,
            local_mss: 0,
            remote_win_scale: 0,
            local_win_scale: 0,
            echo_ts_val: 0,
        }
    }
}

impl TcpOptions {
    /// Parses the raw option bytes of an inbound header. Malformed options
    /// end parsing; everything decoded up to that point stands.
    pub fn parse(&mut self, raw: &[u8], from_syn: bool) {
        let mut at = 0;
        while at < raw.len() {
            match raw[at] {
                KIND_EOL => break,
                KIND_NOP => {
                    at += 1;
                    continue;
                }
                kind => {
                    let Some(&len) = raw.get(at + 1) else { break };
                    let len = usize::from(len);
                    if len < 2 || at + len > raw.len() {
                        break;
                    }
                    let body = &raw[at + 2..at + len];
                    match (kind, len as u8) {
                        (KIND_MSS, LEN_MSS) => {
                            self.remote_mss = u16::from_be_bytes([body[0], body[1]]);
                            self.mss_received = true;
                        }
                        (KIND_WIN_SCALE, LEN_WIN_SCALE) => {
                            self.remote_win_scale = body[0].min(MAX_WINDOW_SCALE);
                            self.win_scale_received = true;
                        }
                        (KIND_SACK_PERMITTED, LEN_SACK_PERMITTED) => {
                            self.sack_received = true;
                        }
                        (KIND_TIMESTAMPS, LEN_TIMESTAMPS) => {
                            self.echo_ts_val =
                                u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                            self.timestamps_received = true;
                        }
                        _ => {}
                    }
                    at += len;
                }
            }
        }
        if from_syn {
            self.remote_syn_seen = true;
            // Window scaling is all-or-nothing: without the peer's offer we
            // must not scale our own advertisements either.
            if !self.win_scale_received {
                self.local_win_scale = 0;
            }
        }
    }

    /// Whether the peer advertised SACK-permitted. Recorded during
    /// negotiation; this engine never emits SACK blocks.
    pub fn sack_permitted(&self) -> bool {
        self.sack_received
    }

    /// Whether the peer advertised an MSS, as opposed to the 536-byte
    /// default being assumed.
    pub fn remote_mss_advertised(&self) -> bool {
        self.mss_received
    }

    fn timestamps_on(&self, syn_on: bool) -> bool {
        if syn_on {
            // The initiator offers timestamps; a SYN-ACK echoes the offer
            // only if the peer made one.
            self.timestamps_received || !self.remote_syn_seen
        } else {
            self.timestamps_received
        }
    }

    /// The encoded size of the options for the next outbound segment,
    /// including NOP padding to a 32-bit boundary.
    pub fn size(&self, syn_on: bool) -> u8 {
        let raw = if syn_on {
            LEN_MSS
                + LEN_WIN_SCALE
                + LEN_SACK_PERMITTED
                + if self.timestamps_on(true) {
                    LEN_TIMESTAMPS
                } else {
                    0
                }
        } else if self.timestamps_on(false) {
            LEN_TIMESTAMPS
        } else {
            0
        };
        (raw + 3) & !3
    }

    /// Encodes the options for the next outbound segment. `ts_val` is our
    /// clock sample for the timestamps option.
    pub fn fill(&self, syn_on: bool, ts_val: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(usize::from(self.size(syn_on)));
        if syn_on {
            out.push(KIND_MSS);
            out.push(LEN_MSS);
            out.extend_from_slice(&self.local_mss.to_be_bytes());
            out.push(KIND_WIN_SCALE);
            out.push(LEN_WIN_SCALE);
            out.push(self.local_win_scale);
            out.push(KIND_SACK_PERMITTED);
            out.push(LEN_SACK_PERMITTED);
            if self.timestamps_on(true) {
                self.fill_timestamps(&mut out, ts_val);
            }
        } else if self.timestamps_on(false) {
            out.push(KIND_NOP);
            out.push(KIND_NOP);
            self.fill_timestamps(&mut out, ts_val);
        }
        while out.len() % 4 != 0 {
            out.push(KIND_NOP);
        }
        out
    }

    fn fill_timestamps(&self, out: &mut Vec<u8>, ts_val: u32) {
        out.push(KIND_TIMESTAMPS);
        out.push(LEN_TIMESTAMPS);
        out.extend_from_slice(&ts_val.to_be_bytes());
        out.extend_from_slice(&self.echo_ts_val.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syn_options_roundtrip() {
        let mut ours = TcpOptions {
            local_mss: 1460,
            local_win_scale: 7,
            ..Default::default()
        };
        let encoded = ours.fill(true, 0x1122_3344);
        assert_eq!(encoded.len() % 4, 0);
        assert_eq!(encoded.len(), usize::from(ours.size(true)));

        let mut theirs = TcpOptions::default();
        theirs.parse(&encoded, true);
        assert!(theirs.mss_received);
        assert_eq!(theirs.remote_mss, 1460);
        assert!(theirs.win_scale_received);
        assert_eq!(theirs.remote_win_scale, 7);
        assert!(theirs.sack_received);
        assert!(theirs.timestamps_received);
        assert_eq!(theirs.echo_ts_val, 0x1122_3344);
        // The responder now echoes the received timestamp back.
        ours.parse(&theirs.fill(true, 7), true);
        assert_eq!(ours.echo_ts_val, 7);
    }

    #[test]
    fn window_scale_is_clamped() {
        let raw = [KIND_WIN_SCALE, LEN_WIN_SCALE, 200, KIND_EOL];
        let mut options = TcpOptions::default();
        options.parse(&raw, true);
        assert_eq!(options.remote_win_scale, MAX_WINDOW_SCALE);
    }

    #[test]
    fn missing_offer_disables_scaling_both_ways() {
        let mut options = TcpOptions {
            local_win_scale: 7,
            ..Default::default()
        };
        let raw = [KIND_MSS, LEN_MSS, 0x05, 0xb4];
        options.parse(&raw, true);
        assert_eq!(options.remote_mss, 1460);
        assert_eq!(options.local_win_scale, 0);
        assert_eq!(options.remote_win_scale, 0);
    }

    #[test]
    fn absent_mss_defaults() {
        let options = TcpOptions::default();
        assert_eq!(options.remote_mss, DEFAULT_REMOTE_MSS);
    }

    #[test]
    fn unknown_options_are_skipped() {
        let raw = [
            KIND_NOP,
            254, // unknown kind
            4,
            0xab,
            0xcd,
            KIND_MSS,
            LEN_MSS,
            0x02,
            0x18,
        ];
        let mut options = TcpOptions::default();
        options.parse(&raw, false);
        assert!(options.mss_received);
        assert_eq!(options.remote_mss, 536);
    }

    #[test]
    fn non_syn_segments_carry_only_timestamps() {
        let mut options = TcpOptions::default();
        assert_eq!(options.size(false), 0);
        assert!(options.fill(false, 1).is_empty());
        options.parse(
            &[KIND_TIMESTAMPS, LEN_TIMESTAMPS, 0, 0, 0, 9, 0, 0, 0, 0],
            false,
        );
        assert_eq!(options.size(false), 12);
        let encoded = options.fill(false, 0xa0a0_a0a0);
        assert_eq!(&encoded[..2], &[KIND_NOP, KIND_NOP]);
        assert_eq!(&encoded[8..12], &9u32.to_be_bytes());
    }
}
