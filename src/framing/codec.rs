use crate::framing::{FramingError, MonPacket, PacketHeader, HDR_LEN};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Splits a byte stream into [`MonPacket`]s.
///
/// A frame is only yielded once its header and its whole payload are buffered.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonCodec {
    pending: Option<PacketHeader>,
}

impl MonCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for MonCodec {
    type Item = MonPacket;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let hdr = match self.pending {
            Some(hdr) => hdr,
            None => {
                if src.len() < HDR_LEN {
                    return Ok(None);
                }
                let mut raw = [0; HDR_LEN];
                src.copy_to_slice(&mut raw);
                let hdr = PacketHeader::from_bytes(raw);
                self.pending = Some(hdr);
                hdr
            }
        };

        let payload_len = hdr.payload_len as usize;
        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            return Ok(None);
        }
        self.pending = None;
        let payload = src.split_to(payload_len).to_vec();
        Ok(Some(MonPacket {
            cmd: hdr.cmd,
            seq: hdr.seq,
            payload,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(pkt) = self.decode(src)? {
            return Ok(Some(pkt));
        }
        match self.pending.take() {
            Some(hdr) => Err(FramingError::Incomplete {
                expected: HDR_LEN + hdr.payload_len as usize,
                received: HDR_LEN + src.len(),
            }),
            None if !src.is_empty() => Err(FramingError::Incomplete {
                expected: HDR_LEN,
                received: src.len(),
            }),
            None => Ok(None),
        }
    }
}

impl Encoder<MonPacket> for MonCodec {
    type Error = FramingError;

    fn encode(&mut self, pkt: MonPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_len = u16::try_from(pkt.payload.len())
            .map_err(|_| FramingError::BadLength(pkt.payload.len(), u16::MAX as usize))?;
        dst.reserve(HDR_LEN + pkt.payload.len());
        dst.put_u8(pkt.cmd);
        dst.put_u8(pkt.seq);
        dst.put_u16(payload_len);
        dst.put_slice(&pkt.payload);
        Ok(())
    }
}
