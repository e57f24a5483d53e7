//! Replays a captured monitor session from a dump file, at the pace it was captured at.
//!
//! A dump is a sequence of records, each holding one frame of the monitor link and its capture
//! timestamp. The [`ReplayServer`] plays the dump in a loop to one TCP client at a time, which
//! makes it a deterministic stand-in for the security module when testing the monitor.

mod dump;
mod scheduler;
mod server;

pub use dump::{DumpError, DumpReader, DumpRecord, MAX_RECORD_LEN};
pub use scheduler::{ReplayScheduler, ReplaySettings, SessionEnd};
pub use server::ReplayServer;

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to open dump file {}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to listen on {addr}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Replay I/O error")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
