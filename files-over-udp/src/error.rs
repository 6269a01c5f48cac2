//! Error taxonomy shared by the client and server sessions.

use std::io;

use thiserror::Error;

use crate::frame::FrameError;
use crate::retry::RetryError;
use crate::socket::SocketError;
use crate::state::FailureKind;

/// Why a transfer could not complete.
///
/// Sequence mismatches are deliberately absent: they are an expected outcome
/// of loss and duplication and only ever trigger a re-acknowledgement.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The handshake got no acceptable reply within the retry budget.
    #[error("handshake timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// A data chunk was never acknowledged, or the peer went silent.
    #[error("connection lost at sequence {seq}")]
    ConnectionLost { seq: u64 },

    /// The peer sent an ERROR frame; the message is the peer's own text.
    #[error("peer reported: {0}")]
    Remote(String),

    /// Local file I/O failed.  Partially written output is left as is.
    #[error("local I/O error: {0}")]
    Resource(#[from] io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Transport(#[from] SocketError),

    /// The operation is not valid in the session's current state.
    #[error("operation not valid in the current session state")]
    BadState,
}

impl TransferError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::ConnectionLost { .. } => FailureKind::ConnectionLost,
            Self::Remote(_) => FailureKind::Remote,
            Self::Resource(_) => FailureKind::Resource,
            Self::Frame(_) | Self::Transport(_) | Self::BadState => FailureKind::Transport,
        }
    }

    /// Map a retry failure, using `on_timeout` for an exhausted budget.
    pub(crate) fn from_retry(err: RetryError, on_timeout: Self) -> Self {
        match err {
            RetryError::Timeout { .. } => on_timeout,
            RetryError::Transport(e) => Self::Transport(e),
        }
    }
}
