//! Process settings, read from the environment after loading an optional `.env` file.

use crate::replay::ReplaySettings;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn load_dotenv() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Settings of the `dsm-tap` monitor
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MonitorConfig {
    pub target_addr: String,
    pub target_port: u16,
    pub websocket_url: String,
    /// Wait before reconnecting to the target after the link ends
    pub restart_delay: Duration,
    pub io_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target_addr: "127.0.0.1".to_owned(),
            target_port: 14445,
            websocket_url: "ws://127.0.0.1:8000/ws".to_owned(),
            restart_delay: Duration::from_secs(3),
            io_timeout: Duration::from_secs(3),
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default = Self::default();
        Ok(Self {
            target_addr: lookup("TARGET_ADDR").unwrap_or(default.target_addr),
            target_port: parse_or(&lookup, "TARGET_PORT", default.target_port)?,
            websocket_url: lookup("WEBSOCKET_SERVER").unwrap_or(default.websocket_url),
            restart_delay: Duration::from_secs(parse_or(
                &lookup,
                "RESTART_DELAY",
                default.restart_delay.as_secs(),
            )?),
            io_timeout: Duration::from_secs(parse_or(
                &lookup,
                "IO_TIMEOUT_SECS",
                default.io_timeout.as_secs(),
            )?),
        })
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.target_addr, self.target_port)
    }
}

/// Settings of the `dsm-replay` server
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReplayConfig {
    pub dump_file: PathBuf,
    pub listen_addr: IpAddr,
    pub listen_port: u16,
    pub io_timeout: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            dump_file: PathBuf::from("record_mon.dump"),
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 14445,
            io_timeout: Duration::from_secs(3),
        }
    }
}

impl ReplayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default = Self::default();
        Ok(Self {
            dump_file: lookup("DUMP_FILE")
                .map(PathBuf::from)
                .unwrap_or(default.dump_file),
            listen_addr: parse_or(&lookup, "LISTEN_ADDR", default.listen_addr)?,
            listen_port: parse_or(&lookup, "LISTEN_PORT", default.listen_port)?,
            io_timeout: Duration::from_secs(parse_or(
                &lookup,
                "IO_TIMEOUT_SECS",
                default.io_timeout.as_secs(),
            )?),
        })
    }

    pub fn listen(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.listen_port)
    }

    pub fn replay_settings(&self) -> ReplaySettings {
        ReplaySettings {
            io_timeout: self.io_timeout,
            ..Default::default()
        }
    }
}
