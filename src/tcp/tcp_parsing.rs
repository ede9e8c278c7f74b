//! TCP header parsing and serialization.

use super::seq::SeqNum;
use crate::payload::Payload;
use crate::utility::Checksum;
use std::net::Ipv4Addr;

/// The length of a TCP header without options.
pub const TCP_HDR_LEN_MIN: usize = 20;

/// How the checksum field of an outbound segment is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    /// Compute the full checksum over pseudo-header, header, and payload.
    Software,
    /// The NIC computes the checksum; preload the field with the folded
    /// pseudo-header sum as virtio and dpdk transmit offload require.
    Offloaded,
}

/// An error encountered while reading a TCP header off the wire. Parse
/// failures never leave the demultiplexer; the segment is dropped silently.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("the segment is shorter than the TCP header")]
    HeaderTooShort,
    #[error("data offset {0} words is invalid for the segment")]
    BadDataOffset(u8),
    #[error("invalid checksum")]
    InvalidChecksum,
}

/// The control bits of a TCP header, in wire layout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Control(u8);

impl Control {
    const FIN: u8 = 0x01;
    const SYN: u8 = 0x02;
    const RST: u8 = 0x04;
    const PSH: u8 = 0x08;
    const ACK: u8 = 0x10;
    const URG: u8 = 0x20;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0x3f)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// No more data from sender
    pub fn fin(self) -> bool {
        self.0 & Self::FIN != 0
    }

    /// Synchronize sequence numbers
    pub fn syn(self) -> bool {
        self.0 & Self::SYN != 0
    }

    /// Reset the connection
    pub fn rst(self) -> bool {
        self.0 & Self::RST != 0
    }

    /// Push function
    pub fn psh(self) -> bool {
        self.0 & Self::PSH != 0
    }

    /// Acknowledgment field significant
    pub fn ack(self) -> bool {
        self.0 & Self::ACK != 0
    }

    /// Urgent pointer field significant
    pub fn urg(self) -> bool {
        self.0 & Self::URG != 0
    }
}

/// A parsed or constructed TCP header, including its raw option bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: SeqNum,
    pub ack: SeqNum,
    /// Header length in 32-bit words.
    pub data_offset: u8,
    pub ctl: Control,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
    /// Raw option bytes, `data_offset * 4 - 20` of them.
    pub options: Vec<u8>,
}

impl TcpHeader {
    /// Parses a header from the front of `segment`, which must contain the
    /// whole TCP segment so the checksum can be verified. Verification is
    /// skipped when the NIC already validated it (`verify_checksum` false).
    pub fn parse(
        segment: &[u8],
        src_address: Ipv4Addr,
        dst_address: Ipv4Addr,
        verify_checksum: bool,
    ) -> Result<Self, ParseError> {
        if segment.len() < TCP_HDR_LEN_MIN {
            return Err(ParseError::HeaderTooShort);
        }
        let data_offset = segment[12] >> 4;
        let header_len = usize::from(data_offset) * 4;
        if header_len < TCP_HDR_LEN_MIN || header_len > segment.len() {
            return Err(ParseError::BadDataOffset(data_offset));
        }

        if verify_checksum {
            let mut csum = Checksum::new();
            csum.add_pseudo_header(src_address, dst_address, segment.len() as u16);
            csum.add_bytes(segment);
            // Summing the segment together with its own checksum folds to
            // all-ones when the data is intact.
            if csum.value() != 0xffff {
                return Err(ParseError::InvalidChecksum);
            }
        }

        let read_u16 = |at: usize| u16::from_be_bytes([segment[at], segment[at + 1]]);
        let read_u32 = |at: usize| {
            u32::from_be_bytes([
                segment[at],
                segment[at + 1],
                segment[at + 2],
                segment[at + 3],
            ])
        };

        Ok(TcpHeader {
            src_port: read_u16(0),
            dst_port: read_u16(2),
            seq: SeqNum(read_u32(4)),
            ack: SeqNum(read_u32(8)),
            data_offset,
            ctl: Control::from_bits(segment[13]),
            window: read_u16(14),
            checksum: read_u16(16),
            urgent: read_u16(18),
            options: segment[TCP_HDR_LEN_MIN..header_len].to_vec(),
        })
    }

    /// The header length in bytes.
    pub fn header_len(&self) -> usize {
        usize::from(self.data_offset) * 4
    }

    /// Writes the header and its options in wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TCP_HDR_LEN_MIN + self.options.len());
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.raw().to_be_bytes());
        out.extend_from_slice(&self.ack.raw().to_be_bytes());
        out.push(self.data_offset << 4);
        out.push(self.ctl.bits());
        out.extend_from_slice(&self.window.to_be_bytes());
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.urgent.to_be_bytes());
        out.extend_from_slice(&self.options);
        out
    }
}

/// Constructs outbound TCP headers, filling the checksum for the segment's
/// payload according to the transmit offload mode.
#[derive(Debug)]
pub struct TcpHeaderBuilder {
    src_port: u16,
    dst_port: u16,
    seq: SeqNum,
    ack: Option<SeqNum>,
    ctl: u8,
    window: u16,
    options: Vec<u8>,
}

impl TcpHeaderBuilder {
    pub fn new(src_port: u16, dst_port: u16, seq: SeqNum) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            ack: None,
            ctl: 0,
            window: 0,
            options: Vec::new(),
        }
    }

    pub fn ack(mut self, ack: SeqNum) -> Self {
        self.ack = Some(ack);
        self.ctl |= Control::ACK;
        self
    }

    pub fn syn(mut self) -> Self {
        self.ctl |= Control::SYN;
        self
    }

    pub fn fin(mut self) -> Self {
        self.ctl |= Control::FIN;
        self
    }

    pub fn rst(mut self) -> Self {
        self.ctl |= Control::RST;
        self
    }

    pub fn psh(mut self) -> Self {
        self.ctl |= Control::PSH;
        self
    }

    pub fn window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    /// Attaches option bytes, which must already be padded to a 32-bit
    /// boundary.
    pub fn options(mut self, options: Vec<u8>) -> Self {
        debug_assert!(options.len() % 4 == 0 && options.len() <= 40);
        self.options = options;
        self
    }

    pub fn build(
        self,
        local: Ipv4Addr,
        remote: Ipv4Addr,
        payload: &Payload,
        mode: ChecksumMode,
    ) -> TcpHeader {
        let header_len = TCP_HDR_LEN_MIN + self.options.len();
        let mut header = TcpHeader {
            src_port: self.src_port,
            dst_port: self.dst_port,
            seq: self.seq,
            ack: self.ack.unwrap_or_default(),
            data_offset: (header_len / 4) as u8,
            ctl: Control::from_bits(self.ctl),
            window: self.window,
            checksum: 0,
            urgent: 0,
            options: self.options,
        };

        let tcp_len = (header_len + payload.len()) as u16;
        let mut csum = Checksum::new();
        csum.add_pseudo_header(local, remote, tcp_len);
        header.checksum = match mode {
            ChecksumMode::Software => {
                csum.add_bytes(&header.serialize());
                for chunk in payload.chunks() {
                    csum.add_bytes(chunk);
                }
                csum.finish()
            }
            ChecksumMode::Offloaded => csum.value(),
        };
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

    #[test]
    fn parses_packet() -> anyhow::Result<()> {
        let payload = b"Hello, world!";
        let src_port = 0xcafe;
        let dst_port = 0xbabe;
        let sequence = 123456789;
        let window = 1024;
        let acknowledgement = 10;
        let mut expected = etherparse::TcpHeader::new(src_port, dst_port, sequence, window);
        expected.acknowledgment_number = acknowledgement;
        expected.ack = true;
        expected.psh = true;
        let ip_header = etherparse::Ipv4Header::new(
            payload.len().try_into()?,
            30,
            etherparse::IpNumber::Tcp as u8,
            SRC.octets(),
            DST.octets(),
        );
        expected.checksum = expected.calc_checksum_ipv4(&ip_header, payload)?;
        let mut serial = vec![];
        expected.write(&mut serial)?;
        serial.extend_from_slice(payload);

        let actual = TcpHeader::parse(&serial, SRC, DST, true)?;
        assert_eq!(actual.src_port, src_port);
        assert_eq!(actual.dst_port, dst_port);
        assert_eq!(actual.seq, SeqNum(sequence));
        assert_eq!(actual.ack, SeqNum(acknowledgement));
        assert!(actual.ctl.ack());
        assert!(actual.ctl.psh());
        assert!(!actual.ctl.syn());
        assert_eq!(actual.window, window);
        assert_eq!(actual.checksum, expected.checksum);
        assert_eq!(actual.urgent, 0);
        assert!(actual.options.is_empty());
        Ok(())
    }

    #[test]
    fn build_parse_roundtrip() -> anyhow::Result<()> {
        let payload = Payload::new(&b"roundtrip body"[..]);
        let header = TcpHeaderBuilder::new(4321, 80, SeqNum(1000))
            .ack(SeqNum(2000))
            .psh()
            .window(29200)
            .build(SRC, DST, &payload, ChecksumMode::Software);

        let mut wire = header.serialize();
        wire.extend_from_slice(&payload.to_vec());
        let parsed = TcpHeader::parse(&wire, SRC, DST, true)?;
        assert_eq!(parsed, header);
        Ok(())
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let payload = Payload::new(&b"some data"[..]);
        let header = TcpHeaderBuilder::new(1, 2, SeqNum(7))
            .ack(SeqNum(9))
            .window(512)
            .build(SRC, DST, &payload, ChecksumMode::Software);
        let mut wire = header.serialize();
        wire.extend_from_slice(&payload.to_vec());
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        assert_eq!(
            TcpHeader::parse(&wire, SRC, DST, true),
            Err(ParseError::InvalidChecksum)
        );
    }

    #[test]
    fn offloaded_checksum_is_the_pseudo_header_sum() {
        let payload = Payload::new(&b"xyz"[..]);
        let header = TcpHeaderBuilder::new(1, 2, SeqNum(0)).window(100).build(
            SRC,
            DST,
            &payload,
            ChecksumMode::Offloaded,
        );
        let mut csum = Checksum::new();
        csum.add_pseudo_header(SRC, DST, (TCP_HDR_LEN_MIN + 3) as u16);
        assert_eq!(header.checksum, csum.value());
    }

    #[test]
    fn rejects_short_and_malformed_headers() {
        assert_eq!(
            TcpHeader::parse(&[0u8; 12], SRC, DST, false),
            Err(ParseError::HeaderTooShort)
        );
        // data_offset of 3 words is below the minimum header size
        let mut segment = [0u8; 20];
        segment[12] = 3 << 4;
        assert_eq!(
            TcpHeader::parse(&segment, SRC, DST, false),
            Err(ParseError::BadDataOffset(3))
        );
        // data_offset pointing past the end of the segment
        segment[12] = 8 << 4;
        assert_eq!(
            TcpHeader::parse(&segment, SRC, DST, false),
            Err(ParseError::BadDataOffset(8))
        );
    }
}
