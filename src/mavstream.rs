//! Incremental MAVLink v1/v2 decoding of monitored plaintext.
//!
//! The monitor link gives no hint of where MAVLink messages start inside a frame's content,
//! so bytes are fed one at a time into a [`MavlinkParser`], which resynchronizes on the start
//! markers and yields a [`MavFrame`] each time a checksum-valid message completes.
//! Frames are then decoded against the `common` dialect of the [`mavlink`] crate into a
//! [`MavlinkMessage`]. Messages outside the dialect keep their header but carry no fields.

mod message;
mod parser;

pub use message::MavlinkMessage;
pub use parser::{frame_checksum, MavFrame, MavlinkParser, ParserStats};

pub use mavlink::{MavlinkVersion, MAV_STX as MAVLINK_STX_V1, MAV_STX_V2 as MAVLINK_STX_V2};

use mavlink::common::MavMessage;
use mavlink::Message;

/// Dialect name of `msgid`, or `UNKNOWN_<msgid>`
pub fn message_name(msgid: u32) -> String {
    match MavMessage::default_message_from_id(msgid) {
        Ok(msg) => msg.message_name().to_owned(),
        Err(_) => format!("UNKNOWN_{}", msgid),
    }
}

/// Feeds all of `data` into `parser` and decodes every message that completes
pub fn decode_stream(parser: &mut MavlinkParser, data: &[u8]) -> Vec<MavlinkMessage> {
    parser
        .feed(data)
        .iter()
        .map(MavlinkMessage::decode)
        .collect()
}
