//! Taps the monitor link of the security module and forwards everything seen on it to a
//! websocket.

use anyhow::{Context, Result};
use dsm_monitor::config::MonitorConfig;
use dsm_monitor::framing::MonSocket;
use dsm_monitor::monitor::{Monitor, MonitorExit};
use dsm_monitor::telemetry::WsBridge;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const BRIDGE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection to the telemetry server and the target, until either ends
async fn run_session(cfg: &MonitorConfig, cancel: &CancellationToken) -> Result<MonitorExit> {
    let bridge = WsBridge::connect(&cfg.websocket_url, BRIDGE_CONNECT_TIMEOUT).await?;
    let bridge = Arc::new(bridge);

    let target = cfg.target();
    info!("Connecting to {}", target);
    let mut sock = match MonSocket::connect(&target, cfg.io_timeout).await {
        Ok(sock) => sock,
        Err(e) => {
            bridge.close().await;
            return Err(e).with_context(|| format!("Failed to connect to {}", target));
        }
    };
    info!("Connected to {}", target);

    let mut monitor = Monitor::new(bridge.clone());
    let exit = monitor.run(&mut sock, &target, cancel).await;
    info!("Session stats: {:?}", monitor.stats());
    bridge.close().await;
    Ok(exit)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dsm_monitor=info,dsm_tap=info".into()),
        )
        .init();

    let cfg = MonitorConfig::from_env()?;
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping monitor");
            stopper.cancel();
        }
    });

    loop {
        match run_session(&cfg, &cancel).await {
            Ok(MonitorExit::Shutdown) => break,
            Ok(MonitorExit::ConnectionEnded(e)) if e.is_disconnect() => {
                info!("Monitor link ended: {}", e)
            }
            Ok(MonitorExit::ConnectionEnded(e)) => warn!("Monitor link failed: {}", e),
            Err(e) => error!("Monitor session failed: {:#}", e),
        }
        if cancel.is_cancelled() {
            break;
        }
        info!("Restarting in {:?}", cfg.restart_delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(cfg.restart_delay) => {}
        }
    }
    Ok(())
}
