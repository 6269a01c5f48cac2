//! Session finite-state machine (FSM) types.
//!
//! State transitions are *not* implemented here; they live in
//! [`crate::client`] and [`crate::server`].  Every legal transition is
//! drawn below.
//!
//! ```text
//!  initiator:
//!    IDLE ──SYN──▶ HANDSHAKING ──SYN_ACK──▶ TRANSFERRING ──FIN──▶ CLOSING ──▶ CLOSED
//!                       │                        │
//!                       └─ERROR / timeout─▶ FAILED ◀─ERROR / lost─┘
//!
//!  responder (per peer):
//!    LISTENING ──SYN UPLOAD───▶ AWAITING_DATA ──FIN──▶ CLOSED ──▶ LISTENING
//!        │     ──SYN DOWNLOAD─▶ STREAMING ──last ACK / abandon──▶ CLOSED
//!        └──ERROR "File Not Found"─▶ LISTENING
//! ```

use std::fmt;

/// Coarse reason recorded when an initiator session fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    ConnectionLost,
    Remote,
    Resource,
    Transport,
}

/// States of the requesting side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitiatorState {
    /// No handshake attempted yet.
    #[default]
    Idle,
    /// SYN sent; waiting for SYN_ACK or ERROR.
    Handshaking,
    /// Handshake accepted; data flowing.
    Transferring,
    /// FIN sent; waiting (softly) for its ACK.
    Closing,
    /// Terminal: session ended cleanly.
    Closed,
    /// Terminal: session aborted.
    Failed(FailureKind),
}

impl InitiatorState {
    /// `true` while a transfer owns the session.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Handshaking | Self::Transferring | Self::Closing)
    }
}

/// States of the serving side for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponderState {
    /// No session for this peer.
    #[default]
    Listening,
    /// Upload accepted; writing DATA to the sink.
    AwaitingData,
    /// Download accepted; pushing DATA to the peer.
    Streaming,
    /// Transfer finished; the session is about to leave the table.
    Closed,
}

impl fmt::Display for InitiatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl fmt::Display for ResponderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
