//! Initiator side of a transfer.
//!
//! A [`Client`] owns the state for one logical transfer against one server:
//! - Driving the initiator FSM (see [`crate::state::InitiatorState`]).
//! - The handshake, then either an upload (client pushes chunks) or a
//!   download (server pushes chunks, client acknowledges), then FIN.
//! - Every "send and wait for a reply" step goes through
//!   [`crate::retry::send_and_await`].
//!
//! ```ignore
//! let socket = Socket::bind("0.0.0.0:0".parse()?).await?;
//! let mut client = Client::new(socket, server, ClientConfig::default());
//! client.upload_file(Path::new("notes.txt")).await?;
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::error::TransferError;
use crate::frame::{next_seq, Frame, FrameType, MAX_PAYLOAD_SIZE};
use crate::handshake::Operation;
use crate::retry::{is_chunk_ack, send_and_await};
use crate::socket::Transport;
use crate::state::InitiatorState;
use crate::storage::read_chunk;

/// Prefix of every file a client stores from a download.
pub const DOWNLOAD_PREFIX: &str = "client_";

/// A single transfer session, requesting side.
pub struct Client<T> {
    transport: T,
    server: SocketAddr,
    config: ClientConfig,
    state: InitiatorState,
    /// Next sequence number to send (upload) or expect (download).
    seq: u64,
    /// First DATA frame of a download that arrived in place of a lost SYN_ACK.
    early_data: Option<Frame>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, server: SocketAddr, config: ClientConfig) -> Self {
        Self {
            transport,
            server,
            config,
            state: InitiatorState::Idle,
            seq: 0,
            early_data: None,
        }
    }

    pub fn state(&self) -> InitiatorState {
        self.state
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Send SYN `"<operation>:<filename>"` at `initial_seq` and wait for the
    /// server to accept it.
    ///
    /// An ERROR reply fails the session with the server's message.  For a
    /// download, a DATA frame at `initial_seq` also counts as acceptance: the
    /// server only streams after sending SYN_ACK, so that SYN_ACK was lost.
    pub async fn establish(
        &mut self,
        operation: Operation,
        filename: &str,
        initial_seq: u64,
    ) -> Result<(), TransferError> {
        if self.state.is_active() {
            return Err(TransferError::BadState);
        }

        let syn = Frame::syn(initial_seq, operation.as_str(), filename)?;
        self.state = InitiatorState::Handshaking;
        self.early_data = None;
        log::debug!("[client] → {syn} ({operation} {filename})");

        let streaming = operation == Operation::Download;
        let reply = send_and_await(
            &self.transport,
            &syn,
            self.server,
            &self.config.retry,
            |f| match f.kind() {
                FrameType::SynAck => f.seq() == initial_seq,
                FrameType::Error => true,
                FrameType::Data => streaming && f.seq() == initial_seq,
                _ => false,
            },
        )
        .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                let attempts = self.config.retry.max_attempts;
                return Err(self.fail(TransferError::from_retry(e, TransferError::Timeout { attempts })));
            }
        };

        match reply.kind() {
            FrameType::Error => Err(self.fail(TransferError::Remote(reply.text().into_owned()))),
            kind => {
                if kind == FrameType::Data {
                    log::debug!("[client] SYN_ACK lost; server already streaming");
                    self.early_data = Some(reply);
                }
                self.seq = initial_seq;
                self.state = InitiatorState::Transferring;
                log::info!("[client] {operation} {filename} accepted by {}", self.server);
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Push `source` to the server one chunk at a time, then close.
    ///
    /// Returns the number of bytes acknowledged.
    pub async fn upload<R>(&mut self, source: &mut R) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        if self.state != InitiatorState::Transferring {
            return Err(TransferError::BadState);
        }

        let mut sent = 0u64;
        let mut chunks = 0u64;
        loop {
            let chunk = match read_chunk(source, MAX_PAYLOAD_SIZE).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => return Err(self.fail(e.into())),
            };
            let len = chunk.len() as u64;
            let seq = self.seq;
            // The chunk after this one, or the closing FIN, needs `seq + 1`.
            let next = match next_seq(seq) {
                Ok(next) => next,
                Err(e) => return Err(self.fail(e.into())),
            };
            let data = Frame::data(seq, chunk)?;

            let reply = send_and_await(&self.transport, &data, self.server, &self.config.retry, |f| {
                f.kind() == FrameType::Error || is_chunk_ack(f, seq)
            })
            .await;

            match reply {
                Ok(reply) if reply.kind() == FrameType::Error => {
                    return Err(self.fail(TransferError::Remote(reply.text().into_owned())));
                }
                Ok(reply) => {
                    log::debug!("[client] ← {reply} for DATA seq={seq}");
                    self.seq = next;
                    chunks += 1;
                    sent += len;
                }
                Err(e) => {
                    return Err(self.fail(TransferError::from_retry(
                        e,
                        TransferError::ConnectionLost { seq },
                    )));
                }
            }
        }

        log::info!("[client] uploaded {sent} bytes in {chunks} chunk(s)");
        self.terminate(self.seq).await;
        Ok(sent)
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    /// Receive the server's chunks into `sink` until FIN.
    ///
    /// In-order DATA is written and acknowledged with its sequence number.
    /// Any other DATA is acknowledged with the sequence number it carries and
    /// not written.  Returns the number of bytes written.
    pub async fn download<W>(&mut self, sink: &mut W) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        if self.state != InitiatorState::Transferring {
            return Err(TransferError::BadState);
        }

        let window = self.config.retry.timeout;
        let mut written = 0u64;
        let mut idle = 0u32;
        // Only frames from the server restart the window; strangers do not.
        let mut window_end = Instant::now() + window;
        loop {
            let frame = match self.early_data.take() {
                Some(frame) => frame,
                None => {
                    let remaining = window_end.saturating_duration_since(Instant::now());
                    match self.transport.recv_timeout(remaining).await {
                        Ok(Some((frame, from))) if from == self.server => frame,
                        Ok(Some((frame, from))) => {
                            log::debug!("[client] ignoring {frame} from stranger {from}");
                            continue;
                        }
                        Ok(None) => {
                            idle += 1;
                            if idle >= self.config.idle_windows {
                                let seq = self.seq;
                                return Err(self.fail(TransferError::ConnectionLost { seq }));
                            }
                            window_end = Instant::now() + window;
                            continue;
                        }
                        Err(e) => return Err(self.fail(e.into())),
                    }
                }
            };
            idle = 0;
            window_end = Instant::now() + window;

            match frame.kind() {
                FrameType::Data if frame.seq() == self.seq => {
                    if let Err(e) = sink.write_all(frame.payload()).await {
                        return Err(self.fail(e.into()));
                    }
                    written += frame.payload().len() as u64;
                    self.send_ack(self.seq).await?;
                    self.seq += 1;
                }
                FrameType::Data => {
                    log::debug!(
                        "[client] out-of-order DATA seq={} (expected {}); re-acknowledging",
                        frame.seq(),
                        self.seq
                    );
                    self.send_ack(frame.seq()).await?;
                }
                FrameType::Fin => {
                    self.send_ack(frame.seq()).await?;
                    if let Err(e) = sink.flush().await {
                        return Err(self.fail(e.into()));
                    }
                    self.state = InitiatorState::Closed;
                    log::info!("[client] downloaded {written} bytes; server closed");
                    return Ok(written);
                }
                FrameType::Error => {
                    return Err(self.fail(TransferError::Remote(frame.text().into_owned())));
                }
                _ => log::debug!("[client] ignoring {frame} during download"),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Termination
    // -----------------------------------------------------------------------

    /// Send FIN at `seq` and wait for any ACK.  Always ends `Closed`: a FIN
    /// that is never acknowledged is logged, not reported.
    pub async fn terminate(&mut self, seq: u64) {
        self.state = InitiatorState::Closing;
        let fin = Frame::fin(seq);
        match send_and_await(&self.transport, &fin, self.server, &self.config.retry, |f| {
            f.kind() == FrameType::Ack
        })
        .await
        {
            Ok(_) => log::debug!("[client] ← ACK of FIN seq={seq}"),
            Err(e) => log::warn!("[client] FIN seq={seq} not acknowledged ({e}); closing anyway"),
        }
        self.state = InitiatorState::Closed;
    }

    // -----------------------------------------------------------------------
    // File helpers
    // -----------------------------------------------------------------------

    /// Upload the local file at `path` under its file name.
    pub async fn upload_file(&mut self, path: &Path) -> Result<u64, TransferError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no usable file name", path.display()),
                )
            })?
            .to_string();
        let mut file = File::open(path).await?;

        self.establish(Operation::Upload, &filename, self.config.initial_seq)
            .await?;
        self.upload(&mut file).await
    }

    /// Download `name` from the server into `dir/client_<name>`.
    ///
    /// The local file is only created once the server has accepted the
    /// request.  Returns the path written and the number of bytes.
    pub async fn download_file(
        &mut self,
        name: &str,
        dir: &Path,
    ) -> Result<(PathBuf, u64), TransferError> {
        self.establish(Operation::Download, name, self.config.initial_seq)
            .await?;

        let path = dir.join(format!("{DOWNLOAD_PREFIX}{name}"));
        let mut file = match File::create(&path).await {
            Ok(file) => file,
            Err(e) => return Err(self.fail(e.into())),
        };
        let written = self.download(&mut file).await?;
        Ok((path, written))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn send_ack(&mut self, seq: u64) -> Result<(), TransferError> {
        match self.transport.send_to(&Frame::ack(seq), self.server).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Record the failure in the FSM and hand the error back.
    fn fail(&mut self, err: TransferError) -> TransferError {
        log::warn!("[client] transfer failed: {err}");
        self.state = InitiatorState::Failed(err.kind());
        err
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::frame::{FrameError, MAX_SEQ};
    use crate::retry::RetryPolicy;
    use crate::simulator::Simulator;
    use crate::socket::Socket;
    use crate::state::FailureKind;

    fn fast() -> ClientConfig {
        ClientConfig::default().with_retry(RetryPolicy::new(5, Duration::from_millis(40)))
    }

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn establish_times_out_after_max_attempts() {
        let silent = loopback().await;
        let mut client = Client::new(Simulator::recording(loopback().await), silent.local_addr, fast());

        let err = client
            .establish(Operation::Upload, "a.bin", 0)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Timeout { attempts: 5 }));
        assert_eq!(client.state(), InitiatorState::Failed(FailureKind::Timeout));
        assert_eq!(client.transport().sent_count(FrameType::Syn), 5);
    }

    #[tokio::test]
    async fn terminate_closes_without_fin_ack() {
        let silent = loopback().await;
        let mut client = Client::new(Simulator::recording(loopback().await), silent.local_addr, fast());

        client.terminate(3).await;

        assert_eq!(client.state(), InitiatorState::Closed);
        assert_eq!(client.transport().sent_count(FrameType::Fin), 5);
    }

    #[tokio::test]
    async fn transfer_requires_a_handshake() {
        let silent = loopback().await;
        let mut client = Client::new(loopback().await, silent.local_addr, fast());

        let mut source: &[u8] = b"abc";
        assert!(matches!(client.upload(&mut source).await, Err(TransferError::BadState)));
        let mut sink = Vec::new();
        assert!(matches!(client.download(&mut sink).await, Err(TransferError::BadState)));
        assert_eq!(client.state(), InitiatorState::Idle);
    }

    #[tokio::test]
    async fn download_mismatch_acks_received_sequence() {
        let server = loopback().await;
        let server_addr = server.local_addr;
        let mut client = Client::new(loopback().await, server_addr, fast());
        let client_addr = client.transport().local_addr;

        let peer = tokio::spawn(async move {
            let wait = Duration::from_secs(2);
            let (syn, _) = server.recv_timeout(wait).await.unwrap().unwrap();
            assert_eq!(syn.text(), "DOWNLOAD:f.txt");
            server.send_to(&Frame::syn_ack(0), client_addr).await.unwrap();

            // Chunk 1 before chunk 0: acknowledged as 1, not written.
            server.send_to(&Frame::data(1, b"world".to_vec()).unwrap(), client_addr).await.unwrap();
            let (ack, _) = server.recv_timeout(wait).await.unwrap().unwrap();
            assert_eq!(ack, Frame::ack(1));

            for (seq, chunk) in [(0u64, &b"hello "[..]), (1, &b"world"[..])] {
                server.send_to(&Frame::data(seq, chunk.to_vec()).unwrap(), client_addr).await.unwrap();
                let (ack, _) = server.recv_timeout(wait).await.unwrap().unwrap();
                assert_eq!(ack, Frame::ack(seq));
            }

            server.send_to(&Frame::fin(2), client_addr).await.unwrap();
            let (ack, _) = server.recv_timeout(wait).await.unwrap().unwrap();
            assert_eq!(ack, Frame::ack(2));
        });

        client.establish(Operation::Download, "f.txt", 0).await.unwrap();
        let mut sink = Vec::new();
        let written = client.download(&mut sink).await.unwrap();

        assert_eq!(sink, b"hello world");
        assert_eq!(written, 11);
        assert_eq!(client.state(), InitiatorState::Closed);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn download_gives_up_on_a_silent_server() {
        let server = loopback().await;
        let server_addr = server.local_addr;
        let mut client = Client::new(loopback().await, server_addr, fast().with_idle_windows(3));
        let client_addr = client.transport().local_addr;

        let peer = tokio::spawn(async move {
            server.recv_timeout(Duration::from_secs(2)).await.unwrap().unwrap();
            server.send_to(&Frame::syn_ack(0), client_addr).await.unwrap();
        });

        client.establish(Operation::Download, "f.txt", 0).await.unwrap();
        let mut sink = Vec::new();
        let err = client.download(&mut sink).await.unwrap_err();

        assert!(matches!(err, TransferError::ConnectionLost { seq: 0 }));
        assert_eq!(client.state(), InitiatorState::Failed(FailureKind::ConnectionLost));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn stranger_traffic_does_not_keep_a_download_alive() {
        let server = loopback().await;
        let server_addr = server.local_addr;
        let mut client = Client::new(loopback().await, server_addr, fast().with_idle_windows(3));
        let client_addr = client.transport().local_addr;

        let peer = tokio::spawn(async move {
            server.recv_timeout(Duration::from_secs(2)).await.unwrap().unwrap();
            server.send_to(&Frame::syn_ack(0), client_addr).await.unwrap();
        });
        let stranger = loopback().await;
        let chatter = tokio::spawn(async move {
            loop {
                let _ = stranger.send_to(&Frame::data(0, b"noise".to_vec()).unwrap(), client_addr).await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        client.establish(Operation::Download, "f.txt", 0).await.unwrap();
        let mut sink = Vec::new();
        let result = tokio::time::timeout(Duration::from_secs(5), client.download(&mut sink)).await;
        chatter.abort();

        let err = result.expect("download kept waiting").unwrap_err();
        assert!(matches!(err, TransferError::ConnectionLost { seq: 0 }));
        assert!(sink.is_empty());
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn establish_rejects_sequence_without_wire_form() {
        let silent = loopback().await;
        let mut client = Client::new(Simulator::recording(loopback().await), silent.local_addr, fast());

        let err = client
            .establish(Operation::Upload, "x", 1 << 63)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::Frame(FrameError::SequenceOutOfRange { .. })
        ));
        assert_eq!(client.transport().sent_count(FrameType::Syn), 0);
        assert_eq!(client.state(), InitiatorState::Idle);
    }

    #[tokio::test]
    async fn upload_stops_before_leaving_the_sequence_space() {
        let server = loopback().await;
        let server_addr = server.local_addr;
        let mut client = Client::new(Simulator::recording(loopback().await), server_addr, fast());
        let client_addr = client.transport().local_addr();

        let peer = tokio::spawn(async move {
            let (syn, _) = server.recv_timeout(Duration::from_secs(2)).await.unwrap().unwrap();
            server.send_to(&Frame::syn_ack(syn.seq()), client_addr).await.unwrap();
        });

        client.establish(Operation::Upload, "x", MAX_SEQ).await.unwrap();
        peer.await.unwrap();
        let mut source: &[u8] = b"tail";
        let err = client.upload(&mut source).await.unwrap_err();

        assert!(matches!(
            err,
            TransferError::Frame(FrameError::SequenceOutOfRange { .. })
        ));
        assert_eq!(client.transport().sent_count(FrameType::Data), 0);
    }
}
