//! Responder side of a transfer.
//!
//! A [`Server`] listens on one [`Transport`] and keeps a table of sessions
//! keyed by peer address.  Frames are handled one at a time:
//! - SYN opens an upload session (`server_<name>` in the [`FileStore`]) or
//!   serves a download by pushing the file to the peer right away.
//! - DATA is appended to the peer's upload when it carries the expected
//!   sequence number; every DATA is answered with `ACK{expected}`.
//! - FIN closes the peer's session and is acknowledged.
//!
//! While a download is being pushed no other frame is handled, so a second
//! peer waits (and retransmits) until the push ends.  Sessions are already
//! isolated per peer; serving peers concurrently means moving each session
//! into its own task.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::config::ServerConfig;
use crate::error::TransferError;
use crate::frame::{next_seq, Frame, FrameType, MAX_PAYLOAD_SIZE};
use crate::handshake::{HandshakeRequest, Operation};
use crate::retry::{is_chunk_ack, send_and_await, RetryError};
use crate::socket::Transport;
use crate::state::ResponderState;
use crate::storage::{read_chunk, FileStore};

/// Prefix of every file the server stores from an upload.
pub const UPLOAD_PREFIX: &str = "server_";

pub const FILE_NOT_FOUND: &str = "File Not Found";
pub const SESSION_MISMATCH: &str = "Session Mismatch";
const CANNOT_CREATE: &str = "Cannot Create File";
const CANNOT_READ: &str = "Cannot Read File";
const WRITE_FAILED: &str = "Write Failed";

/// Something worth reporting that happened to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An upload was accepted and is waiting for data.
    Opened {
        peer: SocketAddr,
        filename: String,
    },
    /// A request was answered with an ERROR frame.
    Rejected {
        peer: SocketAddr,
        filename: String,
        reason: String,
    },
    /// A transfer finished; `next_seq` is the sequence after the last chunk.
    Completed {
        peer: SocketAddr,
        operation: Operation,
        filename: String,
        bytes: u64,
        next_seq: u64,
    },
    /// A transfer stopped before completion.
    Abandoned {
        peer: SocketAddr,
        filename: String,
        seq: u64,
    },
}

struct Session<W> {
    state: ResponderState,
    filename: String,
    initial_seq: u64,
    expected_seq: u64,
    bytes: u64,
    sink: Option<W>,
}

/// What came of pushing a file to a peer.
enum PushOutcome {
    Delivered { bytes: u64, next_seq: u64 },
    Lost { seq: u64 },
    Refused { seq: u64, reason: String },
}

/// A single-endpoint file server.
pub struct Server<T, S: FileStore> {
    transport: T,
    store: S,
    config: ServerConfig,
    sessions: HashMap<SocketAddr, Session<S::Writer>>,
}

impl<T: Transport, S: FileStore> Server<T, S> {
    pub fn new(transport: T, store: S, config: ServerConfig) -> Self {
        Self {
            transport,
            store,
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// State of `peer`'s session; `Listening` when it has none.
    pub fn session_state(&self, peer: SocketAddr) -> ResponderState {
        self.sessions
            .get(&peer)
            .map_or(ResponderState::Listening, |s| s.state)
    }

    /// Next sequence number expected from `peer`, if it has a session.
    pub fn expected_seq(&self, peer: SocketAddr) -> Option<u64> {
        self.sessions.get(&peer).map(|s| s.expected_seq)
    }

    /// Serve forever.  Only a failure to receive ends the loop.
    pub async fn run(&mut self) -> Result<(), TransferError> {
        log::info!("[server] listening on {}", self.local_addr());
        loop {
            if let Some(event) = self.poll_once().await? {
                log_event(&event);
            }
        }
    }

    /// Wait one receive window for a frame and handle it.
    ///
    /// A receive failure is returned.  A failure while answering one peer
    /// only costs that peer its session.
    pub async fn poll_once(&mut self) -> Result<Option<SessionEvent>, TransferError> {
        let Some((frame, peer)) = self.transport.recv_timeout(self.config.retry.timeout).await?
        else {
            return Ok(None);
        };
        match self.handle_frame(frame, peer).await {
            Ok(event) => Ok(event),
            Err(e) => {
                log::warn!("[server] giving up on {peer}: {e}");
                Ok(self.drop_session(peer).await)
            }
        }
    }

    /// Dispatch one inbound frame from `peer`.
    pub async fn handle_frame(
        &mut self,
        frame: Frame,
        peer: SocketAddr,
    ) -> Result<Option<SessionEvent>, TransferError> {
        log::debug!("[server] ← {frame} from {peer}");
        match frame.kind() {
            FrameType::Syn => self.on_syn(frame, peer).await,
            FrameType::Data => self.on_data(frame, peer).await,
            FrameType::Fin => self.on_fin(frame, peer).await,
            FrameType::Error => {
                log::warn!("[server] {peer} reported: {}", frame.text());
                Ok(self.drop_session(peer).await)
            }
            FrameType::Ack | FrameType::SynAck => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // SYN
    // -----------------------------------------------------------------------

    async fn on_syn(
        &mut self,
        syn: Frame,
        peer: SocketAddr,
    ) -> Result<Option<SessionEvent>, TransferError> {
        let request = HandshakeRequest::parse(syn.payload());
        let seq = syn.seq();

        match request.operation {
            Operation::Upload => self.accept_upload(request.filename, seq, peer).await,
            Operation::Download => self.serve_download(request.filename, seq, peer).await,
            Operation::Other(op) => {
                log::warn!("[server] unknown operation {op:?} from {peer}; accepting without transfer");
                self.reply(&Frame::syn_ack(seq), peer).await?;
                Ok(None)
            }
        }
    }

    async fn accept_upload(
        &mut self,
        filename: String,
        seq: u64,
        peer: SocketAddr,
    ) -> Result<Option<SessionEvent>, TransferError> {
        // Same request again: our SYN_ACK was lost, or the SYN was duplicated
        // in flight.  Answer again without truncating what has been written.
        if let Some(existing) = self.sessions.get(&peer) {
            if existing.state == ResponderState::AwaitingData
                && existing.filename == filename
                && existing.initial_seq == seq
            {
                log::debug!("[server] duplicate SYN from {peer}; re-sending SYN_ACK");
                self.reply(&Frame::syn_ack(seq), peer).await?;
                return Ok(None);
            }
        }
        if let Some(old) = self.sessions.remove(&peer) {
            log::warn!("[server] {peer} restarted; dropping session for {}", old.filename);
            close_sink(old.sink).await;
        }

        let stored = format!("{UPLOAD_PREFIX}{filename}");
        let sink = match self.store.create(&stored).await {
            Ok(sink) => sink,
            Err(e) => {
                log::error!("[server] cannot create {stored}: {e}");
                return self.reject(peer, seq, filename, CANNOT_CREATE).await;
            }
        };

        self.sessions.insert(
            peer,
            Session {
                state: ResponderState::AwaitingData,
                filename: filename.clone(),
                initial_seq: seq,
                expected_seq: seq,
                bytes: 0,
                sink: Some(sink),
            },
        );
        transition(peer, ResponderState::Listening, ResponderState::AwaitingData);
        self.reply(&Frame::syn_ack(seq), peer).await?;
        Ok(Some(SessionEvent::Opened { peer, filename }))
    }

    async fn serve_download(
        &mut self,
        filename: String,
        seq: u64,
        peer: SocketAddr,
    ) -> Result<Option<SessionEvent>, TransferError> {
        let mut source = match self.store.open(&filename).await {
            Ok(Some(source)) => source,
            Ok(None) => return self.reject(peer, seq, filename, FILE_NOT_FOUND).await,
            Err(e) => {
                log::error!("[server] cannot open {filename}: {e}");
                return self.reject(peer, seq, filename, CANNOT_READ).await;
            }
        };

        if let Some(old) = self.sessions.remove(&peer) {
            close_sink(old.sink).await;
        }
        self.sessions.insert(
            peer,
            Session {
                state: ResponderState::Streaming,
                filename: filename.clone(),
                initial_seq: seq,
                expected_seq: seq,
                bytes: 0,
                sink: None,
            },
        );
        transition(peer, ResponderState::Listening, ResponderState::Streaming);
        self.reply(&Frame::syn_ack(seq), peer).await?;

        let outcome = self.push(&mut source, peer, seq).await;
        let reached = self.sessions.remove(&peer).map_or(seq, |s| s.expected_seq);
        transition(peer, ResponderState::Streaming, ResponderState::Closed);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("[server] push of {filename} to {peer} failed: {e}");
                return Ok(Some(SessionEvent::Abandoned {
                    peer,
                    filename,
                    seq: reached,
                }));
            }
        };
        match outcome {
            PushOutcome::Delivered { bytes, next_seq: next } => Ok(Some(SessionEvent::Completed {
                peer,
                operation: Operation::Download,
                filename,
                bytes,
                next_seq: next,
            })),
            PushOutcome::Lost { seq } => {
                log::warn!("[server] {peer} stopped acknowledging at seq={seq}; abandoning {filename}");
                Ok(Some(SessionEvent::Abandoned {
                    peer,
                    filename,
                    seq,
                }))
            }
            PushOutcome::Refused { seq, reason } => {
                log::warn!("[server] {peer} aborted download of {filename}: {reason}");
                Ok(Some(SessionEvent::Abandoned {
                    peer,
                    filename,
                    seq,
                }))
            }
        }
    }

    /// Stream `source` to `peer` chunk by chunk starting at `seq`, then FIN.
    async fn push<R>(
        &mut self,
        source: &mut R,
        peer: SocketAddr,
        mut seq: u64,
    ) -> Result<PushOutcome, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let policy = self.config.retry;
        let mut bytes = 0u64;

        loop {
            let chunk = match read_chunk(source, MAX_PAYLOAD_SIZE).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    log::error!("[server] read failed while serving {peer}: {e}");
                    self.reply(&Frame::error(seq, CANNOT_READ)?, peer).await?;
                    return Ok(PushOutcome::Refused {
                        seq,
                        reason: e.to_string(),
                    });
                }
            };
            let len = chunk.len() as u64;
            let next = next_seq(seq)?;
            let data = Frame::data(seq, chunk)?;

            let current = seq;
            let reply = send_and_await(&self.transport, &data, peer, &policy, |f| {
                f.kind() == FrameType::Error || is_chunk_ack(f, current)
            })
            .await;

            match reply {
                Ok(reply) if reply.kind() == FrameType::Error => {
                    return Ok(PushOutcome::Refused {
                        seq,
                        reason: reply.text().into_owned(),
                    });
                }
                Ok(_) => {
                    seq = next;
                    bytes += len;
                    if let Some(session) = self.sessions.get_mut(&peer) {
                        session.expected_seq = seq;
                        session.bytes = bytes;
                    }
                }
                Err(RetryError::Timeout { .. }) => {
                    return Ok(PushOutcome::Lost { seq });
                }
                Err(RetryError::Transport(e)) => return Err(e.into()),
            }
        }

        let fin = Frame::fin(seq);
        match send_and_await(&self.transport, &fin, peer, &policy, |f| {
            f.kind() == FrameType::Ack
        })
        .await
        {
            Ok(_) => log::debug!("[server] ← ACK of FIN seq={seq} from {peer}"),
            Err(e) => log::warn!("[server] FIN seq={seq} to {peer} not acknowledged ({e})"),
        }

        Ok(PushOutcome::Delivered {
            bytes,
            next_seq: seq,
        })
    }

    // -----------------------------------------------------------------------
    // DATA
    // -----------------------------------------------------------------------

    async fn on_data(
        &mut self,
        data: Frame,
        peer: SocketAddr,
    ) -> Result<Option<SessionEvent>, TransferError> {
        let session = match self.sessions.get_mut(&peer) {
            Some(s) if s.state == ResponderState::AwaitingData => s,
            _ => {
                log::debug!("[server] DATA seq={} from {peer} without an upload session", data.seq());
                self.reply(&Frame::error(data.seq(), SESSION_MISMATCH)?, peer).await?;
                return Ok(None);
            }
        };

        let expected = session.expected_seq;
        if data.seq() != expected {
            log::debug!(
                "[server] DATA seq={} from {peer} (expected {expected}); re-acknowledging",
                data.seq()
            );
            self.reply(&Frame::ack(expected), peer).await?;
            return Ok(None);
        }

        let next = next_seq(expected)?;
        let written = match session.sink.as_mut() {
            Some(sink) => sink.write_all(data.payload()).await,
            None => Ok(()),
        };
        if let Err(e) = written {
            log::error!("[server] write for {peer} failed: {e}");
            let filename = session.filename.clone();
            if let Some(failed) = self.sessions.remove(&peer) {
                close_sink(failed.sink).await;
            }
            self.reply(&Frame::error(expected, WRITE_FAILED)?, peer).await?;
            return Ok(Some(SessionEvent::Abandoned {
                peer,
                filename,
                seq: expected,
            }));
        }

        session.bytes += data.payload().len() as u64;
        session.expected_seq = next;
        self.reply(&Frame::ack(expected), peer).await?;
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // FIN
    // -----------------------------------------------------------------------

    async fn on_fin(
        &mut self,
        fin: Frame,
        peer: SocketAddr,
    ) -> Result<Option<SessionEvent>, TransferError> {
        let event = match self.sessions.remove(&peer) {
            Some(session) => {
                transition(peer, session.state, ResponderState::Closed);
                close_sink(session.sink).await;
                Some(SessionEvent::Completed {
                    peer,
                    operation: Operation::Upload,
                    filename: session.filename,
                    bytes: session.bytes,
                    next_seq: session.expected_seq,
                })
            }
            None => None,
        };
        self.reply(&Frame::ack(fin.seq()), peer).await?;
        Ok(event)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Forget `peer`'s session, closing its sink.
    async fn drop_session(&mut self, peer: SocketAddr) -> Option<SessionEvent> {
        let session = self.sessions.remove(&peer)?;
        transition(peer, session.state, ResponderState::Closed);
        close_sink(session.sink).await;
        Some(SessionEvent::Abandoned {
            peer,
            filename: session.filename,
            seq: session.expected_seq,
        })
    }

    async fn reply(&self, frame: &Frame, peer: SocketAddr) -> Result<(), TransferError> {
        log::debug!("[server] → {frame} to {peer}");
        self.transport.send_to(frame, peer).await?;
        Ok(())
    }

    async fn reject(
        &self,
        peer: SocketAddr,
        seq: u64,
        filename: String,
        reason: &str,
    ) -> Result<Option<SessionEvent>, TransferError> {
        self.reply(&Frame::error(seq, reason)?, peer).await?;
        Ok(Some(SessionEvent::Rejected {
            peer,
            filename,
            reason: reason.to_string(),
        }))
    }
}

async fn close_sink<W: AsyncWrite + Unpin>(sink: Option<W>) {
    if let Some(mut sink) = sink {
        if let Err(e) = sink.shutdown().await {
            log::warn!("[server] closing sink failed: {e}");
        }
    }
}

fn transition(peer: SocketAddr, from: ResponderState, to: ResponderState) {
    log::debug!("[server] {peer}: {from} → {to}");
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Opened { peer, filename } => {
            log::info!("[server] {peer} uploading {filename}");
        }
        SessionEvent::Rejected {
            peer,
            filename,
            reason,
        } => log::info!("[server] rejected {peer} for {filename}: {reason}"),
        SessionEvent::Completed {
            peer,
            operation,
            filename,
            bytes,
            ..
        } => log::info!("[server] {operation} {filename} with {peer} complete ({bytes} bytes)"),
        SessionEvent::Abandoned {
            peer,
            filename,
            seq,
        } => log::warn!("[server] {filename} with {peer} abandoned at seq={seq}"),
    }
}
