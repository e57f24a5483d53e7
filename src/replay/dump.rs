use bytes::{Buf, Bytes, BytesMut};
use std::io::SeekFrom;
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tracing::trace;

/// Records must be strictly shorter than this
pub const MAX_RECORD_LEN: usize = 16 * 1024;
/// Length prefix of a record
pub const RECORD_LEN_LEN: usize = 4;
/// Timestamp at the start of every record body
pub const TIMESTAMP_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Short read in dump file, expected {expected} bytes but got {received}")]
    ShortRead { expected: usize, received: usize },
    #[error("Corrupt dump record of {len} bytes at offset {offset:#x}")]
    CorruptRecord { len: usize, offset: u64 },
    #[error("Dump file I/O error")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl DumpError {
    /// True when the file ended exactly between two records
    pub fn is_end_of_dump(&self) -> bool {
        matches!(
            self,
            DumpError::ShortRead {
                expected: RECORD_LEN_LEN,
                received: 0
            }
        )
    }
}

/// One captured frame and the time it was captured at
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct DumpRecord {
    /// Capture time in milliseconds, 0 marks a record that is not replayed
    pub timestamp_ms: u32,
    /// Frame bytes as they were seen on the link, header included
    pub frame: Bytes,
}

impl DumpRecord {
    pub fn new(timestamp_ms: u32, frame: impl Into<Bytes>) -> Self {
        Self {
            timestamp_ms,
            frame: frame.into(),
        }
    }

    pub fn is_marker(&self) -> bool {
        self.timestamp_ms == 0
    }

    /// Serializes the record in dump file layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let total_len = (TIMESTAMP_LEN + self.frame.len()) as u32;
        let mut buf = Vec::with_capacity(RECORD_LEN_LEN + total_len as usize);
        buf.extend_from_slice(&total_len.to_be_bytes());
        buf.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        buf.extend_from_slice(&self.frame);
        buf
    }
}

/// Sequential reader over a dump file, `[u32 BE len][u32 BE timestamp][frame]` repeated
pub struct DumpReader<R> {
    inner: R,
    offset: u64,
}

impl DumpReader<File> {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self::new(File::open(path).await?))
    }
}

impl<R> DumpReader<R>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Byte offset of the next record
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub async fn rewind(&mut self) -> std::io::Result<()> {
        self.inner.seek(SeekFrom::Start(0)).await?;
        self.offset = 0;
        Ok(())
    }

    /// Reads the next record.
    ///
    /// After an error the reader position is unspecified,
    /// callers are expected to [`rewind`](Self::rewind).
    pub async fn next_record(&mut self) -> Result<DumpRecord, DumpError> {
        let mut len_buf = [0u8; RECORD_LEN_LEN];
        let received = read_full(&mut self.inner, &mut len_buf).await?;
        if received < RECORD_LEN_LEN {
            return Err(DumpError::ShortRead {
                expected: RECORD_LEN_LEN,
                received,
            });
        }
        let total_len = u32::from_be_bytes(len_buf) as usize;
        if total_len >= MAX_RECORD_LEN || total_len < TIMESTAMP_LEN {
            return Err(DumpError::CorruptRecord {
                len: total_len,
                offset: self.offset,
            });
        }

        let mut body = BytesMut::zeroed(total_len);
        let received = read_full(&mut self.inner, &mut body).await?;
        if received < total_len {
            return Err(DumpError::ShortRead {
                expected: total_len,
                received,
            });
        }
        trace!(
            "Dump record at {:#x}: {}",
            self.offset,
            hex::encode(&body[..usize::min(body.len(), 32)])
        );
        self.offset += (RECORD_LEN_LEN + total_len) as u64;

        let frame = body.split_off(TIMESTAMP_LEN).freeze();
        let timestamp_ms = body.get_u32();
        Ok(DumpRecord {
            timestamp_ms,
            frame,
        })
    }
}

/// Reads until `buf` is full or the input ends, returning the number of bytes read
async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = reader.read(&mut buf[pos..]).await?;
        if n == 0 {
            break;
        }
        pos += n;
    }
    Ok(pos)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::framing::MonPacket;
    use anyhow::Result;
    use std::io::Cursor;

    fn dump(records: &[DumpRecord]) -> Vec<u8> {
        records.iter().flat_map(|r| r.to_bytes()).collect()
    }

    #[test_log::test]
    fn record_layout() -> Result<()> {
        let frame = MonPacket::new(1u8, 9, vec![0xAA, 0xBB]).to_buf()?;
        let rec = DumpRecord::new(0x01020304, frame);
        assert_eq!(
            rec.to_bytes(),
            vec![0, 0, 0, 10, 1, 2, 3, 4, 1, 9, 0, 2, 0xAA, 0xBB]
        );
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn read_records_then_end() -> Result<()> {
        let records = vec![
            DumpRecord::new(1000, vec![0, 1, 0, 0]),
            DumpRecord::new(0, vec![]),
            DumpRecord::new(1500, vec![3, 2, 0, 1, 0x17]),
        ];
        let mut reader = DumpReader::new(Cursor::new(dump(&records)));
        for expected in &records {
            assert_eq!(&reader.next_record().await?, expected);
        }
        assert!(records[1].is_marker());
        let err = reader.next_record().await.unwrap_err();
        assert!(err.is_end_of_dump(), "{:?}", err);

        reader.rewind().await?;
        assert_eq!(reader.offset(), 0);
        assert_eq!(reader.next_record().await?, records[0]);
        assert_eq!(reader.offset(), 12);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn oversized_record_is_corrupt() -> Result<()> {
        let mut data = DumpRecord::new(1000, vec![0, 1, 0, 0]).to_bytes();
        data.extend_from_slice(&(MAX_RECORD_LEN as u32).to_be_bytes());
        data.extend_from_slice(&[0; 64]);
        let mut reader = DumpReader::new(Cursor::new(data));
        reader.next_record().await?;
        match reader.next_record().await {
            Err(DumpError::CorruptRecord { len, offset }) => {
                assert_eq!(len, MAX_RECORD_LEN);
                assert_eq!(offset, 12);
            }
            other => panic!("Expected a corrupt record, got {:?}", other),
        }
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn largest_record_is_accepted() -> Result<()> {
        let frame = vec![0x5A; MAX_RECORD_LEN - 1 - TIMESTAMP_LEN];
        let data = DumpRecord::new(7, frame.clone()).to_bytes();
        let mut reader = DumpReader::new(Cursor::new(data));
        assert_eq!(reader.next_record().await?.frame, frame);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn truncated_record_is_short_read() -> Result<()> {
        let mut data = DumpRecord::new(1000, vec![0, 1, 0, 4, 1, 2, 3, 4]).to_bytes();
        data.truncate(data.len() - 3);
        let mut reader = DumpReader::new(Cursor::new(data));
        let err = reader.next_record().await.unwrap_err();
        assert!(matches!(
            err,
            DumpError::ShortRead {
                expected: 12,
                received: 9
            }
        ));
        assert!(!err.is_end_of_dump());

        let mut reader = DumpReader::new(Cursor::new(vec![0, 0]));
        let err = reader.next_record().await.unwrap_err();
        assert!(matches!(
            err,
            DumpError::ShortRead {
                expected: 4,
                received: 2
            }
        ));
        Ok(())
    }
}
