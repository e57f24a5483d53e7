use crate::mavstream::parser::MavFrame;
use mavlink::common::MavMessage;
use mavlink::{MavlinkVersion, Message};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// A MAVLink message with its fields extracted
#[derive(PartialEq, Debug, Clone, Serialize)]
pub struct MavlinkMessage {
    #[serde(rename = "message")]
    pub name: String,
    pub msgid: u32,
    #[serde(skip)]
    pub version: MavlinkVersion,
    pub sysid: u8,
    pub compid: u8,
    pub seq: u8,
    pub len: u8,
    pub checksum: u16,
    /// Keyed by field name. Empty when the message is not part of the dialect.
    pub fields: Map<String, Value>,
}

impl MavlinkMessage {
    pub fn decode(frame: &MavFrame) -> Self {
        let (name, fields) = match MavMessage::parse(frame.version, frame.msgid, &frame.payload) {
            Ok(msg) => (msg.message_name().to_owned(), extract_fields(&msg)),
            Err(e) => {
                debug!("No fields for MAVLink msgid {}: {}", frame.msgid, e);
                (super::message_name(frame.msgid), Map::new())
            }
        };
        Self {
            name,
            msgid: frame.msgid,
            version: frame.version,
            sysid: frame.sysid,
            compid: frame.compid,
            seq: frame.seq,
            len: frame.payload.len() as u8,
            checksum: frame.checksum,
            fields,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Top level fields of `msg`.
///
/// Enum and bitflag values are reduced to their name or bits. Arrays are not decoded.
fn extract_fields(msg: &MavMessage) -> Map<String, Value> {
    match serde_json::to_value(msg) {
        Ok(Value::Object(mut map)) => {
            // Internal tag carrying the message name
            map.remove("type");
            if let Some(Value::Object(nested)) = map.remove(msg.message_name()) {
                map = nested;
            }
            map.into_iter().map(|(k, v)| (k, scalar(v))).collect()
        }
        Ok(other) => {
            warn!("Unexpected shape for MAVLink {}: {}", msg.message_name(), other);
            Map::new()
        }
        Err(e) => {
            warn!("Failed to extract fields of MAVLink {}: {}", msg.message_name(), e);
            Map::new()
        }
    }
}

fn scalar(value: Value) -> Value {
    match value {
        Value::Object(map) if map.len() == 1 => map
            .into_iter()
            .next()
            .map_or(Value::Null, |(_, inner)| scalar(inner)),
        Value::Array(_) | Value::Object(_) => Value::Null,
        other => other,
    }
}
