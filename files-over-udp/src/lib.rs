//! `files-over-udp`: reliable file transfer over UDP with stop-and-wait ARQ.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   SYN / DATA / FIN    ┌──────────┐
//!  │  Client  │──────────────────────▶│  Server  │
//!  └────┬─────┘◀──────────────────────└────┬─────┘
//!       │       SYN_ACK / ACK / ERROR      │
//!       │                                  │
//!  ┌────▼──────────────────────────────────▼───┐
//!  │     retry::send_and_await (one frame in   │
//!  │     flight, bounded retransmission)       │
//!  └────┬──────────────────────────────────────┘
//!       │ Frame
//!  ┌────▼──────┐
//!  │ Transport │  (tokio UdpSocket, optionally behind the Simulator)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]      : wire format (serialise / deserialise)
//! - [`socket`]     : the `Transport` port and its UDP implementation
//! - [`simulator`]  : lossy/duplicating transport wrapper for testing
//! - [`retry`]      : the single send-and-await retransmission loop
//! - [`handshake`]  : the `"OPERATION:FILENAME"` SYN payload
//! - [`client`]     : initiator session: establish, upload, download, terminate
//! - [`server`]     : responder sessions keyed by peer address
//! - [`storage`]    : chunked reads and the server's file store
//! - [`state`]      : finite-state-machine types
//! - [`config`]     : client and server tunables
//! - [`error`]      : transfer error taxonomy

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod retry;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod storage;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::TransferError;
pub use frame::{Frame, FrameError, FrameType, HEADER_SIZE, MAX_PAYLOAD_SIZE, MAX_SEQ, MTU};
pub use handshake::Operation;
pub use retry::RetryPolicy;
pub use server::{Server, SessionEvent};
pub use socket::{Socket, Transport};
