//! This module provides an async [`MonSocket`](socket::MonSocket) Stream + Sink that handles
//! [`MonPacket`](packet::MonPacket)s.
//!
//! The monitor link is a packet-based big endian binary protocol:
//! `[cmd:u8][seq:u8][payload_len:u16][payload]`, with no magic, version or checksum.
//! The framing layer only handles this outer header.
//! Interpretation of `cmd` and of the payload lives in [`classify`](crate::classify) and
//! [`mavstream`](crate::mavstream).

mod cmd;
mod codec;
pub mod packet;
mod socket;

pub use cmd::MonCommand;
pub use codec::MonCodec;
pub use packet::{MonPacket, PacketHeader};
pub use socket::MonSocket;

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Size of the fixed frame header
pub const HDR_LEN: usize = 4;
/// Upper bound for a single read or write on the byte channel
pub const BLOCK_LEN: usize = 4 * 1024;

#[derive(Error, Debug)]
pub enum FramingError {
    #[error("Stream ended inside a frame, got {received} of {expected} bytes")]
    Incomplete { expected: usize, received: usize },
    #[error("Connection closed by peer")]
    ConnectionClosed,
    #[error("Bad frame length {0:#x}, header announced {1:#x}")]
    BadLength(usize, usize),
    #[error("No progress on the byte channel for {0:?}")]
    Timeout(Duration),
    #[error("Monitor link IO error")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl FramingError {
    /// Whether the peer went away, as opposed to the stream carrying garbage
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            FramingError::ConnectionClosed
                | FramingError::Incomplete { .. }
                | FramingError::Timeout(_)
        )
    }
}

/// Writes `buf` in chunks of at most [`BLOCK_LEN`] bytes.
///
/// Each chunk must make progress within `timeout`.
/// A write that accepts zero bytes means the peer is gone.
pub async fn write_chunked<W>(
    sink: &mut W,
    buf: &[u8],
    timeout: Duration,
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let mut pos = 0;
    while pos < buf.len() {
        let end = usize::min(pos + BLOCK_LEN, buf.len());
        let written = tokio::time::timeout(timeout, sink.write(&buf[pos..end]))
            .await
            .map_err(|_| FramingError::Timeout(timeout))??;
        if written == 0 {
            return Err(FramingError::ConnectionClosed);
        }
        trace!("Wrote {:#x} bytes at {:#x} of {:#x}", written, pos, buf.len());
        pos += written;
    }
    tokio::time::timeout(timeout, sink.flush())
        .await
        .map_err(|_| FramingError::Timeout(timeout))??;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{write_chunked, FramingError, BLOCK_LEN};
    use anyhow::Result;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[test_log::test(tokio::test)]
    async fn chunked_write_delivers_everything() -> Result<()> {
        let (mut tx, mut rx) = tokio::io::duplex(64 * 1024);
        let data: Vec<u8> = (0..3 * BLOCK_LEN + 17).map(|i| i as u8).collect();
        write_chunked(&mut tx, &data, Duration::from_secs(1)).await?;
        drop(tx);
        let mut got = Vec::new();
        rx.read_to_end(&mut got).await?;
        assert_eq!(got, data);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn chunked_write_to_closed_peer_fails() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        drop(rx);
        let err = write_chunked(&mut tx, &[1, 2, 3], Duration::from_secs(1))
            .await
            .unwrap_err();
        // A duplex with no reader reports a broken pipe
        assert!(matches!(err, FramingError::Io { .. } | FramingError::ConnectionClosed));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn chunked_write_times_out_on_stalled_peer() {
        let (mut tx, _rx) = tokio::io::duplex(16);
        let err = write_chunked(&mut tx, &[0u8; 64], Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, FramingError::Timeout(_)));
        assert!(err.is_disconnect());
    }
}
