//! The handshake request carried in a SYN payload: `"OPERATION:FILENAME"`.

use std::fmt;

/// Filename used when a SYN names none.
pub const DEFAULT_FILENAME: &str = "default.bin";

/// What the initiator asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Client pushes a file to the server.
    Upload,
    /// Server pushes a file to the client.
    Download,
    /// Anything else a peer put in the operation field.
    Other(String),
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Upload => "UPLOAD",
            Self::Download => "DOWNLOAD",
            Self::Other(op) => op,
        }
    }

    pub fn parse(op: &str) -> Self {
        match op {
            "UPLOAD" => Self::Upload,
            "DOWNLOAD" => Self::Download,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed SYN payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub operation: Operation,
    pub filename: String,
}

impl HandshakeRequest {
    /// Parse a SYN payload.  Invalid UTF-8 is replaced rather than rejected;
    /// a missing or empty filename becomes [`DEFAULT_FILENAME`].
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let (op, filename) = match text.split_once(':') {
            Some((op, name)) if !name.is_empty() => (op, name),
            Some((op, _)) => (op, DEFAULT_FILENAME),
            None => (text.as_ref(), DEFAULT_FILENAME),
        };
        Self {
            operation: Operation::parse(op),
            filename: filename.to_string(),
        }
    }
}
