use crate::replay::{DumpReader, ReplayError, ReplayScheduler, ReplaySettings, SessionEnd};
use std::net::SocketAddr;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Serves a dump to one client at a time.
///
/// Further clients wait in the listen backlog until the current one is gone.
pub struct ReplayServer<R> {
    listener: TcpListener,
    scheduler: ReplayScheduler<R>,
}

impl ReplayServer<File> {
    /// Opens the dump then listens on `addr`. Both failures are fatal.
    pub async fn bind(
        dump_path: impl AsRef<Path>,
        addr: SocketAddr,
        settings: ReplaySettings,
    ) -> Result<Self, ReplayError> {
        let dump_path = dump_path.as_ref();
        let reader = DumpReader::open(dump_path)
            .await
            .map_err(|source| ReplayError::Open {
                path: dump_path.to_owned(),
                source,
            })?;
        info!("Opened dump file {}", dump_path.display());
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ReplayError::Bind { addr, source })?;
        Ok(Self::new(listener, ReplayScheduler::new(reader, settings)))
    }
}

impl<R> ReplayServer<R>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    pub fn new(listener: TcpListener, scheduler: ReplayScheduler<R>) -> Self {
        Self {
            listener,
            scheduler,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients and replays the dump to each in turn, until `cancel` fires
    pub async fn serve(&mut self, cancel: &CancellationToken) -> Result<(), ReplayError> {
        info!("Replay listening on {}", self.local_addr()?);
        loop {
            let (mut stream, peer) = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                res = self.listener.accept() => match res {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept replay client: {}", e);
                        continue;
                    }
                },
            };
            info!("Replay client connected from {}", peer);
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            match self.scheduler.run_session(&mut stream, cancel).await? {
                SessionEnd::ClientGone(e) => info!("Replay client {} gone: {}", peer, e),
                SessionEnd::PassesDone => {
                    info!("Replay to {} complete", peer);
                    let _ = stream.shutdown().await;
                }
                SessionEnd::Shutdown => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::ReplayServer;
    use crate::replay::{ReplayError, ReplaySettings};
    use anyhow::Result;
    use std::net::SocketAddr;

    #[test_log::test(tokio::test)]
    async fn missing_dump_is_fatal() -> Result<()> {
        let path = std::env::temp_dir().join("dsm-monitor-missing-dump-file.dump");
        let addr: SocketAddr = "127.0.0.1:0".parse()?;
        let res = ReplayServer::bind(&path, addr, ReplaySettings::default()).await;
        match res {
            Err(ReplayError::Open { path: p, .. }) => assert_eq!(p, path),
            Err(e) => panic!("Unexpected error {}", e),
            Ok(_) => panic!("Opened a missing dump file"),
        }
        Ok(())
    }
}
