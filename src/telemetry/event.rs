use crate::classify::{classify, PacketKind, Source};
use crate::framing::MonPacket;
use crate::mavstream::MavlinkMessage;
use serde::Serialize;
use tracing::warn;

pub const PACKET_TYPE_MAVLINK: &str = "mavlink";

#[derive(Serialize, PartialEq, Debug, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TelemetryEvent {
    Status { message: String },
    Packet(PacketEvent),
}

#[derive(Serialize, PartialEq, Debug, Clone)]
pub struct PacketEvent {
    pub cmd: u8,
    pub seq: u8,
    /// Whole frame length, header included. Not sent for MAVLink batches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    pub data: PacketData,
    pub packet_type: String,
    pub source: String,
}

#[derive(Serialize, PartialEq, Debug, Clone)]
#[serde(untagged)]
pub enum PacketData {
    /// Every byte of the frame as two lowercase hex digits
    Hex(Vec<String>),
    /// Text payload of a state frame
    State(String),
    /// One JSON document per decoded message
    Mavlink(Vec<String>),
}

impl TelemetryEvent {
    pub fn status(message: impl Into<String>) -> Self {
        TelemetryEvent::Status {
            message: message.into(),
        }
    }

    /// Describes a raw frame. State frames carry their payload as text, everything else as hex.
    pub fn packet(pkt: &MonPacket) -> Self {
        let (kind, source) = classify(pkt);
        let data = if kind == PacketKind::ControlState {
            PacketData::State(String::from_utf8_lossy(&pkt.payload).into_owned())
        } else {
            let mut bytes = pkt.header().to_bytes().to_vec();
            bytes.extend_from_slice(&pkt.payload);
            PacketData::Hex(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        };
        TelemetryEvent::Packet(PacketEvent {
            cmd: pkt.cmd,
            seq: pkt.seq,
            length: Some(pkt.wire_len()),
            data,
            packet_type: kind.to_string(),
            source: source.to_string(),
        })
    }

    /// Batches the messages decoded from one frame, `None` if there are none
    pub fn mavlink_batch(pkt: &MonPacket, source: Source, msgs: &[MavlinkMessage]) -> Option<Self> {
        if msgs.is_empty() {
            return None;
        }
        let docs = msgs
            .iter()
            .filter_map(|m| match m.to_json() {
                Ok(doc) => Some(doc),
                Err(e) => {
                    warn!("Failed to serialize MAVLink {}: {}", m.name, e);
                    None
                }
            })
            .collect();
        Some(TelemetryEvent::Packet(PacketEvent {
            cmd: pkt.cmd,
            seq: pkt.seq,
            length: None,
            data: PacketData::Mavlink(docs),
            packet_type: PACKET_TYPE_MAVLINK.to_owned(),
            source: source.to_string(),
        }))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
