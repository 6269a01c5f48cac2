//! Datagram transport abstraction.
//!
//! [`Transport`] is the narrow port the protocol layers talk to: send one
//! [`Frame`] to an address, or wait a bounded time for the next valid frame.
//! [`Socket`] implements it as a thin wrapper around `tokio::net::UdpSocket`.
//! All protocol logic lives elsewhere; this module owns only byte I/O.
//!
//! Datagrams that fail to decode never surface as errors: the unreliable
//! network is expected to deliver garbage now and then, so they are logged and
//! treated as if nothing had arrived.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

use crate::frame::{Frame, FrameError};

/// Maximum UDP payload size (theoretical limit; frames are at most the MTU).
const MAX_DATAGRAM: usize = 65_535;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from transport operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
    /// An outbound frame could not be built.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

// ---------------------------------------------------------------------------
// Transport port
// ---------------------------------------------------------------------------

/// Frame-oriented datagram port consumed by the client and server.
///
/// The futures are `Send` so that a client or server can be moved into a
/// spawned task.
pub trait Transport: Send + Sync {
    /// Encode `frame` and send it as a single datagram to `dest`.
    fn send_to(
        &self,
        frame: &Frame,
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), SocketError>> + Send;

    /// Wait at most `wait` for the next decodable frame.
    ///
    /// `Ok(None)` means the window elapsed; it is not an error.
    fn recv_timeout(
        &self,
        wait: Duration,
    ) -> impl Future<Output = Result<Option<(Frame, SocketAddr)>, SocketError>> + Send;

    /// Address this endpoint is bound to.
    fn local_addr(&self) -> SocketAddr;
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, frame-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send raw bytes, bypassing the codec.  Used to inject garbage in tests.
    pub async fn send_raw(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }
}

impl Transport for Socket {
    async fn send_to(&self, frame: &Frame, dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(&frame.encode(), dest).await?;
        Ok(())
    }

    async fn recv_timeout(
        &self,
        wait: Duration,
    ) -> Result<Option<(Frame, SocketAddr)>, SocketError> {
        let deadline = Instant::now() + wait;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (n, addr) = match timeout_at(deadline, self.inner.recv_from(&mut buf)).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok(received)) => received,
                Ok(Err(e)) if is_unreachable_peer(&e) => {
                    log::debug!("[socket] ignoring {e} reported by the OS");
                    continue;
                }
                Ok(Err(e)) => return Err(e.into()),
            };

            match Frame::decode(&buf[..n]) {
                Ok(frame) => return Ok(Some((frame, addr))),
                Err(e) => log::debug!("[socket] discarding {n}-byte datagram from {addr}: {e}"),
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// ICMP "port unreachable" surfaces on some platforms as an error on the
/// next receive.  For an unconnected datagram socket it only means a previous
/// send went nowhere, which the retry logic already handles.
fn is_unreachable_peer(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}
