use crate::mavstream::{MAVLINK_STX_V1, MAVLINK_STX_V2};
use crc_any::CRCu16;
use mavlink::common::MavMessage;
use mavlink::{MavlinkVersion, Message};
use std::collections::VecDeque;
use tracing::{debug, trace};

const V1_HDR_LEN: usize = 6;
const V2_HDR_LEN: usize = 10;
const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const IFLAG_SIGNED: u8 = 0x01;

/// One complete, checksum-valid MAVLink frame
#[derive(PartialEq, Debug, Clone)]
pub struct MavFrame {
    pub version: MavlinkVersion,
    pub seq: u8,
    pub sysid: u8,
    pub compid: u8,
    pub msgid: u32,
    /// Payload as received, MAVLink 2 payloads may be truncated
    pub payload: Vec<u8>,
    pub checksum: u16,
}

/// X.25 checksum of a frame in `buf`, from the magic byte through the end of the payload.
///
/// The seed byte comes from the `common` dialect, ids outside of it are seeded with 0.
pub fn frame_checksum(buf: &[u8], msgid: u32) -> u16 {
    let mut crc = CRCu16::crc16mcrf4cc();
    crc.digest(buf.get(1..).unwrap_or_default());
    crc.digest(&[MavMessage::extra_crc(msgid)]);
    crc.get_crc()
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ParserStats {
    /// Frames that completed with a valid checksum
    pub messages_received: u32,
    /// Frames dropped because of a checksum mismatch
    pub crc_errors: u32,
    /// Frames dropped because of unsupported MAVLink 2 flags
    pub bad_flags: u32,
}

#[derive(Eq, PartialEq, Debug, Copy, Clone)]
enum ParseState {
    Idle,
    Header { hdr_len: usize },
    Payload,
    Checksum,
    Signature,
}

/// Byte-at-a-time MAVLink frame parser.
///
/// Any bytes outside of a frame are skipped. State persists across calls,
/// so a frame may be split at any point between successive feeds.
/// When a frame is rejected, the bytes after its start marker are scanned again,
/// so a false start never hides a real message behind it.
#[derive(Debug, Clone)]
pub struct MavlinkParser {
    state: ParseState,
    buf: Vec<u8>,
    rescan: VecDeque<u8>,
    stats: ParserStats,
}

impl Default for MavlinkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MavlinkParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Idle,
            buf: Vec::with_capacity(V2_HDR_LEN + 255 + CHECKSUM_LEN + SIGNATURE_LEN),
            rescan: VecDeque::new(),
            stats: ParserStats::default(),
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Feeds `data` one byte at a time, returning every frame it completed
    pub fn feed(&mut self, data: &[u8]) -> Vec<MavFrame> {
        let mut frames = Vec::new();
        for &byte in data {
            self.rescan.push_back(byte);
            while let Some(byte) = self.rescan.pop_front() {
                if let Some(frame) = self.parse_byte(byte) {
                    frames.push(frame);
                }
            }
        }
        frames
    }

    fn is_v2(&self) -> bool {
        self.buf.first() == Some(&MAVLINK_STX_V2)
    }

    fn hdr_len(&self) -> usize {
        if self.is_v2() {
            V2_HDR_LEN
        } else {
            V1_HDR_LEN
        }
    }

    fn payload_len(&self) -> usize {
        self.buf.get(1).copied().unwrap_or(0) as usize
    }

    fn payload_end(&self) -> usize {
        self.hdr_len() + self.payload_len()
    }

    fn signed(&self) -> bool {
        self.is_v2() && self.buf[2] & IFLAG_SIGNED != 0
    }

    fn msgid(&self) -> u32 {
        if self.is_v2() {
            u32::from_le_bytes([self.buf[7], self.buf[8], self.buf[9], 0])
        } else {
            self.buf[5] as u32
        }
    }

    fn received_checksum(&self) -> u16 {
        let end = self.payload_end();
        u16::from_le_bytes([self.buf[end], self.buf[end + 1]])
    }

    /// Drops the frame in progress and queues everything after its start marker for rescanning
    fn reject(&mut self) {
        for &b in self.buf[1..].iter().rev() {
            self.rescan.push_front(b);
        }
        self.buf.clear();
        self.state = ParseState::Idle;
    }

    fn parse_byte(&mut self, byte: u8) -> Option<MavFrame> {
        match self.state {
            ParseState::Idle => {
                let hdr_len = match byte {
                    MAVLINK_STX_V1 => V1_HDR_LEN,
                    MAVLINK_STX_V2 => V2_HDR_LEN,
                    _ => return None,
                };
                self.buf.clear();
                self.buf.push(byte);
                self.state = ParseState::Header { hdr_len };
                None
            }
            ParseState::Header { hdr_len } => {
                self.buf.push(byte);
                if hdr_len == V2_HDR_LEN && self.buf.len() == 3 && byte & !IFLAG_SIGNED != 0 {
                    debug!("Dropping MAVLink 2 frame with incompat flags {:#x}", byte);
                    self.stats.bad_flags += 1;
                    self.reject();
                    return None;
                }
                if self.buf.len() == hdr_len {
                    self.state = if self.payload_len() == 0 {
                        ParseState::Checksum
                    } else {
                        ParseState::Payload
                    };
                }
                None
            }
            ParseState::Payload => {
                self.buf.push(byte);
                if self.buf.len() == self.payload_end() {
                    self.state = ParseState::Checksum;
                }
                None
            }
            ParseState::Checksum => {
                self.buf.push(byte);
                if self.buf.len() < self.payload_end() + CHECKSUM_LEN {
                    return None;
                }
                let msgid = self.msgid();
                let received = self.received_checksum();
                let expected = frame_checksum(&self.buf[..self.payload_end()], msgid);
                if received != expected {
                    debug!(
                        "Dropping MAVLink msgid {} with bad checksum {:#06x}, expected {:#06x}",
                        msgid, received, expected
                    );
                    self.stats.crc_errors += 1;
                    self.reject();
                    return None;
                }
                if self.signed() {
                    self.state = ParseState::Signature;
                    return None;
                }
                Some(self.take_frame())
            }
            ParseState::Signature => {
                // Signatures are consumed but not verified
                self.buf.push(byte);
                if self.buf.len() < self.payload_end() + CHECKSUM_LEN + SIGNATURE_LEN {
                    return None;
                }
                Some(self.take_frame())
            }
        }
    }

    fn take_frame(&mut self) -> MavFrame {
        let buf = &self.buf;
        let (version, seq, sysid, compid) = if self.is_v2() {
            (MavlinkVersion::V2, buf[4], buf[5], buf[6])
        } else {
            (MavlinkVersion::V1, buf[2], buf[3], buf[4])
        };
        let frame = MavFrame {
            version,
            seq,
            sysid,
            compid,
            msgid: self.msgid(),
            payload: buf[self.hdr_len()..self.payload_end()].to_vec(),
            checksum: self.received_checksum(),
        };
        trace!(
            "Parsed MAVLink {:?} msgid {} from {}/{}",
            version,
            frame.msgid,
            sysid,
            compid
        );
        self.stats.messages_received += 1;
        self.buf.clear();
        self.state = ParseState::Idle;
        frame
    }
}
