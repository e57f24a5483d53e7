//! Maps a frame's `cmd` to what it carries and who sent it.
//!
//! Classification is total: any `cmd` outside the known table is [`PacketKind::Unknown`]
//! from [`Source::Unknown`], never an error.

mod sniff;

pub use sniff::{
    sniff_content, sniff_mavlink, sniff_openvpn, sniff_tls, ContentSniff, TlsRecord, TlsVersion,
};

use crate::framing::{MonCommand, MonPacket};
use strum_macros::{AsRefStr, Display};

/// Length of the IPv4 + UDP headers in front of the payload of packet-mode commands
pub const IP_AND_UDP_HDR_LEN: usize = 28;

#[derive(Eq, PartialEq, Debug, Copy, Clone, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum PacketKind {
    #[strum(serialize = "plaintext")]
    PlaintextTelemetry,
    #[strum(serialize = "ciphertext")]
    CiphertextTelemetry,
    #[strum(serialize = "state")]
    ControlState,
    Ping,
    Unknown,
}

#[derive(Eq, PartialEq, Debug, Copy, Clone, Hash, Display, AsRefStr)]
pub enum Source {
    #[strum(serialize = "gcs")]
    GroundControl,
    #[strum(serialize = "fcc")]
    FlightController,
    #[strum(serialize = "dsm")]
    SecurityModule,
    #[strum(serialize = "unknown")]
    Unknown,
}

/// Looks up the kind and source of a raw `cmd` value
pub fn classify_cmd(cmd: u8) -> (PacketKind, Source) {
    use PacketKind::*;
    match MonCommand::from(cmd) {
        MonCommand::Recv => (PlaintextTelemetry, Source::FlightController),
        MonCommand::Send => (PlaintextTelemetry, Source::GroundControl),
        MonCommand::EncRecv => (CiphertextTelemetry, Source::FlightController),
        MonCommand::EncSend => (CiphertextTelemetry, Source::GroundControl),
        MonCommand::PktRecv => (PlaintextTelemetry, Source::GroundControl),
        MonCommand::PktSend => (PlaintextTelemetry, Source::FlightController),
        MonCommand::PktEncRecv => (CiphertextTelemetry, Source::FlightController),
        MonCommand::PktEncSend => (CiphertextTelemetry, Source::GroundControl),
        MonCommand::Ping => (Ping, Source::Unknown),
        MonCommand::State => (ControlState, Source::SecurityModule),
        MonCommand::Other(_) => (Unknown, Source::Unknown),
    }
}

pub fn classify(pkt: &MonPacket) -> (PacketKind, Source) {
    classify_cmd(pkt.cmd)
}

/// Offset into the payload where application content starts.
///
/// Packet-mode commands (4 to 7) wrap the content in a fixed IPv4 + UDP header,
/// which is skipped as is.
pub fn content_offset(cmd: u8) -> usize {
    if MonCommand::from(cmd).carries_ip_packet() {
        IP_AND_UDP_HDR_LEN
    } else {
        0
    }
}

/// The application content of a frame, empty if the payload is shorter than its encapsulation
pub fn content(pkt: &MonPacket) -> &[u8] {
    pkt.payload.get(content_offset(pkt.cmd)..).unwrap_or(&[])
}
