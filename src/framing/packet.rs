use crate::framing::{FramingError, MonCommand, HDR_LEN};
use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::io::{Cursor, Write};

/// The fixed header in front of every frame
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub struct PacketHeader {
    pub cmd: u8,
    /// Wrapping 8-bit counter, incremented once per frame by the sender
    pub seq: u8,
    /// Number of payload bytes following the header
    pub payload_len: u16,
}

impl PacketHeader {
    pub fn from_bytes(hdr: [u8; HDR_LEN]) -> Self {
        Self {
            cmd: hdr[0],
            seq: hdr[1],
            payload_len: u16::from_be_bytes([hdr[2], hdr[3]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; HDR_LEN] {
        let len = self.payload_len.to_be_bytes();
        [self.cmd, self.seq, len[0], len[1]]
    }

    pub fn command(&self) -> MonCommand {
        self.cmd.into()
    }
}

/// One complete frame of the monitor link
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct MonPacket {
    pub cmd: u8,
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl MonPacket {
    pub fn new(cmd: impl Into<u8>, seq: u8, payload: Vec<u8>) -> Self {
        Self {
            cmd: cmd.into(),
            seq,
            payload,
        }
    }

    pub fn header(&self) -> PacketHeader {
        PacketHeader {
            cmd: self.cmd,
            seq: self.seq,
            payload_len: self.payload.len() as u16,
        }
    }

    pub fn command(&self) -> MonCommand {
        self.cmd.into()
    }

    /// Length of the frame on the wire, header included
    pub fn wire_len(&self) -> usize {
        HDR_LEN + self.payload.len()
    }

    /// Parses exactly one frame, `buf` must hold nothing past its payload
    pub fn from_buf(buf: &[u8]) -> Result<Self, FramingError> {
        if buf.len() < HDR_LEN {
            return Err(FramingError::Incomplete {
                expected: HDR_LEN,
                received: buf.len(),
            });
        }
        let mut reader = Cursor::new(buf);
        let cmd = reader.read_u8()?;
        let seq = reader.read_u8()?;
        let payload_len = reader.read_u16::<BE>()? as usize;
        let remaining_size = buf.len() - reader.position() as usize;
        if remaining_size != payload_len {
            return Err(FramingError::BadLength(remaining_size, payload_len));
        }
        let payload = buf[HDR_LEN..].to_vec();
        Ok(Self { cmd, seq, payload })
    }

    pub fn to_buf(&self) -> Result<Vec<u8>, FramingError> {
        let payload_len = u16::try_from(self.payload.len())
            .map_err(|_| FramingError::BadLength(self.payload.len(), u16::MAX as usize))?;
        let mut buf = Vec::with_capacity(self.wire_len());
        let mut writer = Cursor::new(&mut buf);
        writer.write_u8(self.cmd)?;
        writer.write_u8(self.seq)?;
        writer.write_u16::<BE>(payload_len)?;
        writer.write_all(&self.payload)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use crate::framing::packet::{MonPacket, PacketHeader};
    use crate::framing::{FramingError, MonCommand};
    use anyhow::Result;

    #[test_log::test]
    fn to_from_buf_serialization() -> Result<()> {
        let pkt = MonPacket::new(MonCommand::PktSend, 0x73, b"Hello world".to_vec());
        let pkt2 = MonPacket::from_buf(&pkt.to_buf()?)?;
        assert_eq!(pkt, pkt2);
        Ok(())
    }

    #[test_log::test]
    fn header_is_big_endian() -> Result<()> {
        let buf = [16, 7, 0x01, 0x02];
        let hdr = PacketHeader::from_bytes(buf);
        assert_eq!(hdr.cmd, 16);
        assert_eq!(hdr.seq, 7);
        assert_eq!(hdr.payload_len, 0x0102);
        assert_eq!(hdr.to_bytes(), buf);
        assert_eq!(hdr.command(), MonCommand::State);
        Ok(())
    }

    #[test_log::test]
    fn wire_bytes_roundtrip() -> Result<()> {
        let wire = [2u8, 200, 0, 3, 0xAA, 0xBB, 0xCC];
        assert_eq!(MonPacket::from_buf(&wire)?.to_buf()?, wire);
        Ok(())
    }

    #[test_log::test]
    fn length_mismatch_rejected() {
        let err = MonPacket::from_buf(&[0, 0, 0, 5, 1, 2]).unwrap_err();
        assert!(matches!(err, FramingError::BadLength(2, 5)));
        let err = MonPacket::from_buf(&[0, 0]).unwrap_err();
        assert!(matches!(
            err,
            FramingError::Incomplete {
                expected: 4,
                received: 2
            }
        ));
    }

    #[test_log::test]
    fn oversized_payload_not_serializable() {
        let pkt = MonPacket::new(0u8, 0, vec![0; u16::MAX as usize + 1]);
        assert!(pkt.to_buf().is_err());
    }
}
