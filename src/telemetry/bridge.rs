use crate::telemetry::{SinkError, TelemetryEvent, TelemetrySink};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events waiting for the writer task. Publishing fails once this many are pending.
pub const QUEUE_LEN: usize = 256;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Publishes telemetry events as JSON text messages on a websocket.
///
/// The socket is owned by a writer task, which clears the `connected` flag when the server
/// closes the socket or a write fails. A server that stops reading stalls the writer, and
/// events are dropped once the queue is full.
pub struct WsBridge {
    connected: Arc<AtomicBool>,
    tx: mpsc::Sender<Message>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl WsBridge {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, SinkError> {
        info!("Connecting to WebSocket server: {}", url);
        let (ws, _resp) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| SinkError::Connect {
                url: url.to_owned(),
                reason: format!("no handshake after {:?}", timeout),
            })?
            .map_err(|e| SinkError::Connect {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;
        info!("WebSocket connected");

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(QUEUE_LEN);
        let writer = tokio::spawn(run_writer(ws, rx, connected.clone()));
        Ok(Self {
            connected,
            tx,
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Sends a close frame and waits for the writer task to finish.
    ///
    /// A writer still stuck after a short grace period is aborted.
    pub async fn close(&self) {
        let writer = match self.writer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut writer) = writer else {
            return;
        };
        // A full queue means the writer is stuck, the timeout below takes care of it
        let _ = self.tx.try_send(Message::Close(None));
        match tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("WebSocket writer task failed: {}", e),
            Err(_) => {
                warn!("WebSocket writer stalled, aborting it");
                writer.abort();
            }
        }
        self.connected.store(false, Ordering::Release);
    }
}

impl TelemetrySink for WsBridge {
    fn publish(&self, event: &TelemetryEvent) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::NotConnected);
        }
        let text = event.to_json()?;
        self.tx
            .try_send(Message::Text(text))
            .map_err(|e| match e {
                TrySendError::Full(_) => SinkError::Full,
                TrySendError::Closed(_) => SinkError::Closed,
            })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

async fn run_writer(
    ws: WsStream,
    mut rx: mpsc::Receiver<Message>,
    connected: Arc<AtomicBool>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            out = rx.recv() => match out {
                Some(Message::Close(frame)) => {
                    let _ = sink.send(Message::Close(frame)).await;
                    break;
                }
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        warn!("WebSocket send error: {}", e);
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
                // Nothing is expected from the server
                Some(Ok(msg)) => debug!("Ignoring WebSocket message: {:?}", msg),
            },
        }
    }
    connected.store(false, Ordering::Release);
    info!("WebSocket disconnected");
}

#[cfg(test)]
mod test {
    use super::{WsBridge, QUEUE_LEN};
    use crate::telemetry::{SinkError, TelemetryEvent, TelemetrySink};
    use anyhow::Result;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    #[test_log::test(tokio::test)]
    async fn publish_then_server_closes() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}/ws", listener.local_addr()?);

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await?;
            let mut ws = tokio_tungstenite::accept_async(tcp).await?;
            let first = ws.next().await.unwrap()?;
            ws.close(None).await?;
            // Drain until the client acknowledges the close
            while let Some(Ok(_)) = ws.next().await {}
            Ok::<_, anyhow::Error>(first)
        });

        let bridge = WsBridge::connect(&url, Duration::from_secs(5)).await?;
        assert!(bridge.is_connected());
        bridge.publish(&TelemetryEvent::status("hello"))?;

        let first = server.await??;
        assert_eq!(
            first,
            Message::Text(r#"{"type":"status","message":"hello"}"#.to_owned())
        );

        for _ in 0..100 {
            if !bridge.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!bridge.is_connected());
        assert!(matches!(
            bridge.publish(&TelemetryEvent::status("late")),
            Err(SinkError::NotConnected)
        ));
        bridge.close().await;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn connect_refused() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}/ws", listener.local_addr()?);
        drop(listener);
        let err = WsBridge::connect(&url, Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SinkError::Connect { .. }));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn close_from_client() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}/ws", listener.local_addr()?);
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await?;
            let mut ws = tokio_tungstenite::accept_async(tcp).await?;
            let mut seen = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                seen.push(msg);
            }
            Ok::<_, anyhow::Error>(seen)
        });

        let bridge = WsBridge::connect(&url, Duration::from_secs(5)).await?;
        bridge.publish(&TelemetryEvent::status("one"))?;
        bridge.close().await;
        assert!(!bridge.is_connected());

        let seen = server.await??;
        assert!(matches!(seen.first(), Some(Message::Text(_))));
        assert!(seen.iter().any(|m| matches!(m, Message::Close(_))));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn stalled_server_drops_events() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}/ws", listener.local_addr()?);
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await?;
            // Completes the handshake, then never reads
            let ws = tokio_tungstenite::accept_async(tcp).await?;
            let _ = released.await;
            drop(ws);
            Ok::<_, anyhow::Error>(())
        });

        let bridge = WsBridge::connect(&url, Duration::from_secs(5)).await?;
        let event = TelemetryEvent::status("x".repeat(16 * 1024));
        let mut accepted = 0;
        let mut full = false;
        for _ in 0..20_000 {
            match bridge.publish(&event) {
                Ok(()) => accepted += 1,
                Err(SinkError::Full) => {
                    full = true;
                    break;
                }
                Err(e) => panic!("Unexpected error after {} events: {}", accepted, e),
            }
            tokio::task::yield_now().await;
        }
        assert!(full, "queue never filled after {} events", accepted);
        assert!(accepted >= QUEUE_LEN);
        assert!(bridge.is_connected());

        bridge.close().await;
        assert!(!bridge.is_connected());
        let _ = release.send(());
        server.await??;
        Ok(())
    }
}
