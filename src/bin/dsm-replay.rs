//! Plays a recorded monitor session to clients of the monitor port, for testing `dsm-tap`.
//!
//! Usage: `dsm-replay [dump_file] [port]`. Arguments override `DUMP_FILE` and `LISTEN_PORT`.

use anyhow::{Context, Result};
use dsm_monitor::config::ReplayConfig;
use dsm_monitor::replay::ReplayServer;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dsm_monitor=info,dsm_replay=info".into()),
        )
        .init();

    let mut cfg = ReplayConfig::from_env()?;
    let mut args = std::env::args().skip(1);
    if let Some(path) = args.next() {
        cfg.dump_file = path.into();
    }
    if let Some(port) = args.next() {
        cfg.listen_port = port
            .parse()
            .with_context(|| format!("Invalid port {:?}", port))?;
    }

    let mut server =
        ReplayServer::bind(&cfg.dump_file, cfg.listen(), cfg.replay_settings()).await?;
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping replay");
            stopper.cancel();
        }
    });
    server.serve(&cancel).await?;
    Ok(())
}
