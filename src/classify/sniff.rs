//! Heuristic recognition of what the content region of a frame carries.
//!
//! None of these checks are authoritative, a miss only means "not recognized".

use crate::classify::content;
use crate::framing::{MonCommand, MonPacket};
use crate::mavstream::{self, MAVLINK_STX_V1, MAVLINK_STX_V2};
use strum_macros::{Display, FromRepr};

#[repr(u8)]
#[derive(Eq, PartialEq, Debug, Copy, Clone, Display, FromRepr)]
pub enum TlsRecord {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    AppData = 23,
}

#[repr(u16)]
#[derive(Eq, PartialEq, Debug, Copy, Clone, Display, FromRepr)]
pub enum TlsVersion {
    #[strum(serialize = "TLS1.2")]
    Tls12 = 0x0303,
    #[strum(serialize = "TLS1.3")]
    Tls13 = 0x0304,
    #[strum(serialize = "DTLS1.2")]
    Dtls12 = 0xFEFD,
}

#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum ContentSniff {
    Tls {
        version: TlsVersion,
        record: TlsRecord,
    },
    /// OpenVPN P_DATA_V2 with key id 0 and peer id 0
    OpenVpnData,
    Mavlink {
        msgid: u32,
    },
}

impl std::fmt::Display for ContentSniff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentSniff::Tls { version, record } => write!(f, "{} {}", version, record),
            ContentSniff::OpenVpnData => write!(f, "OPENVPN P_DATA_V2"),
            ContentSniff::Mavlink { msgid } => {
                write!(f, "MAV {}", mavstream::message_name(*msgid))
            }
        }
    }
}

pub fn sniff_tls(data: &[u8]) -> Option<ContentSniff> {
    let (&ty, rest) = data.split_first()?;
    let record = TlsRecord::from_repr(ty)?;
    let ver = u16::from_be_bytes(rest.get(..2)?.try_into().ok()?);
    let version = TlsVersion::from_repr(ver)?;
    Some(ContentSniff::Tls { version, record })
}

pub fn sniff_openvpn(data: &[u8]) -> Option<ContentSniff> {
    match data.get(..4)? {
        [0x48, 0x00, 0x00, 0x00] => Some(ContentSniff::OpenVpnData),
        _ => None,
    }
}

/// Reads the message id of a MAVLink frame starting at `data[0]`, without validating the frame
pub fn sniff_mavlink(data: &[u8]) -> Option<ContentSniff> {
    match data {
        [MAVLINK_STX_V1, len, _, _, _, msgid, ..] if *len > 0 => Some(ContentSniff::Mavlink {
            msgid: *msgid as u32,
        }),
        [MAVLINK_STX_V2, len, _, _, _, _, _, id0, id1, id2, ..] if *len > 0 => {
            Some(ContentSniff::Mavlink {
                msgid: u32::from_le_bytes([*id0, *id1, *id2, 0]),
            })
        }
        _ => None,
    }
}

/// Runs the sniffers that make sense for the frame's command.
///
/// Packet-mode content is checked for OpenVPN, bare content for TLS, and both for MAVLink.
pub fn sniff_content(pkt: &MonPacket) -> Option<ContentSniff> {
    let data = content(pkt);
    let tunnel = if MonCommand::from(pkt.cmd).carries_ip_packet() {
        sniff_openvpn(data)
    } else {
        sniff_tls(data)
    };
    tunnel.or_else(|| sniff_mavlink(data))
}
