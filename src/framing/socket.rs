use crate::framing::{FramingError, MonCodec, MonPacket, BLOCK_LEN};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{error, trace};

/// Caps every read on the inner channel at [`BLOCK_LEN`] bytes, whatever the caller asks for
struct BlockRead<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> AsyncRead for BlockRead<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let mut block = [0u8; BLOCK_LEN];
        let len = usize::min(buf.remaining(), BLOCK_LEN);
        let mut chunk = ReadBuf::new(&mut block[..len]);
        ready!(Pin::new(&mut self.get_mut().inner).poll_read(cx, &mut chunk))?;
        buf.put_slice(chunk.filled());
        Poll::Ready(Ok(()))
    }
}

pub struct MonSocket<IO> {
    read: FramedRead<BlockRead<ReadHalf<IO>>, MonCodec>,
    write: FramedWrite<WriteHalf<IO>, MonCodec>,
    read_timeout: Option<Duration>,
}

impl<IO> MonSocket<IO>
where
    IO: AsyncRead + AsyncWrite,
{
    pub fn new(io: IO) -> Self {
        let (read, write) = tokio::io::split(io);
        let read = BlockRead { inner: read };
        let read = FramedRead::with_capacity(read, MonCodec::new(), BLOCK_LEN);
        let write = FramedWrite::new(write, MonCodec::new());
        Self {
            read,
            write,
            read_timeout: None,
        }
    }

    /// A read that makes no progress for `timeout` ends the connection
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Waits for the next complete frame.
    ///
    /// The peer closing the stream on a frame boundary is reported as
    /// [`FramingError::ConnectionClosed`].
    pub async fn read_frame(&mut self) -> Result<MonPacket, FramingError> {
        let next = match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.next())
                .await
                .map_err(|_| FramingError::Timeout(timeout))?,
            None => self.next().await,
        };
        next.unwrap_or(Err(FramingError::ConnectionClosed))
    }

    pub async fn write_frame(&mut self, pkt: MonPacket) -> Result<(), FramingError> {
        self.send(pkt).await
    }
}

impl MonSocket<TcpStream> {
    /// Connects to the monitor port at `addr`.
    ///
    /// `io_timeout` bounds the connection attempt, and then every wait for a frame.
    pub async fn connect(addr: &str, io_timeout: Duration) -> Result<Self, FramingError> {
        let stream = tokio::time::timeout(io_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| FramingError::Timeout(io_timeout))??;
        stream.set_nodelay(true)?;
        let mut sock = Self::new(stream);
        sock.set_read_timeout(Some(io_timeout));
        Ok(sock)
    }
}

impl<IO> Stream for MonSocket<IO>
where
    IO: AsyncRead + AsyncWrite,
{
    type Item = Result<MonPacket, FramingError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(this.read.poll_next_unpin(cx)) {
            Some(Ok(pkt)) => {
                trace!(
                    "Received cmd 0x{:x} seq {} with 0x{:x} bytes payload: {}",
                    pkt.cmd,
                    pkt.seq,
                    pkt.payload.len(),
                    hex::encode(&pkt.payload),
                );
                Poll::Ready(Some(Ok(pkt)))
            }
            Some(Err(e)) => {
                error!("Failed to read monitor frame: {}", e);
                Poll::Ready(Some(Err(e)))
            }
            None => Poll::Ready(None),
        }
    }
}

impl<IO> Sink<MonPacket> for MonSocket<IO>
where
    IO: AsyncRead + AsyncWrite,
{
    type Error = FramingError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().write.poll_ready_unpin(cx)
    }

    fn start_send(self: Pin<&mut Self>, pkt: MonPacket) -> Result<(), Self::Error> {
        trace!(
            "Sending cmd 0x{:x} seq {} with 0x{:x} bytes payload: {}",
            pkt.cmd,
            pkt.seq,
            pkt.payload.len(),
            hex::encode(&pkt.payload),
        );
        self.get_mut().write.start_send_unpin(pkt)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().write.poll_flush_unpin(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().write.poll_close_unpin(cx)
    }
}
