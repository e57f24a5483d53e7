//! Tap and replay for the monitor link of a DSM secured telemetry channel
//!
//! The DSM is a security module between a ground control station and a flight controller
//! that tunnels their MAVLink traffic, in plaintext or encrypted. It also exposes a monitor port
//! on TCP where every packet it handles is copied out as a small frame:
//!
//! ```text
//! [cmd: u8][seq: u8][payload_len: u16 BE][payload]
//! ```
//!
//! The `cmd` byte says which way the packet went, whether it was encrypted, and whether the
//! payload is a full IP/UDP datagram or bare application data. Ping and state frames are mixed in.
//!
//! This crate provides:
//! - An async socket for the monitor link ([`framing::MonSocket`]).
//! - Classification of frames by kind and traffic source, with content sniffing for TLS,
//!   OpenVPN and MAVLink ([`classify`]).
//! - An incremental MAVLink v1/v2 parser, decoding messages of the `common` dialect
//!   ([`mavstream`]).
//! - A [`monitor::Monitor`] that publishes every frame, and the MAVLink messages found in
//!   plaintext frames, to a [`telemetry::TelemetrySink`] such as the websocket
//!   [`telemetry::WsBridge`].
//! - A replay server that plays a recorded dump back with its original timing ([`replay`]).
//!
//! ## Notice
//!
//! MAVLink decoding is generic. Message semantics are not interpreted, array fields are not
//! decoded, and messages outside the `common` dialect are reported without fields.

pub mod classify;
pub mod config;
pub mod framing;
pub mod mavstream;
pub mod monitor;
pub mod replay;
pub mod sequence;
pub mod telemetry;

pub use framing::MonSocket;
