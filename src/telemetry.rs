//! Structured events published for every observation on the monitor link.
//!
//! The monitor only depends on the [`TelemetrySink`] trait. [`WsBridge`] is the websocket
//! implementation used by the `dsm-tap` binary.

mod bridge;
mod event;

pub use bridge::WsBridge;
pub use event::{PacketData, PacketEvent, TelemetryEvent};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Telemetry sink is not connected")]
    NotConnected,
    #[error("Telemetry sink closed")]
    Closed,
    #[error("Telemetry queue is full")]
    Full,
    #[error("Could not connect telemetry sink to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("Failed to serialize telemetry event")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
}

/// Best-effort destination for [`TelemetryEvent`]s.
///
/// Publishing must not block the caller. Events published while disconnected, or while the
/// sink is backed up, fail instead of being queued.
pub trait TelemetrySink {
    fn publish(&self, event: &TelemetryEvent) -> Result<(), SinkError>;

    fn is_connected(&self) -> bool;
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for std::sync::Arc<T> {
    fn publish(&self, event: &TelemetryEvent) -> Result<(), SinkError> {
        (**self).publish(event)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
