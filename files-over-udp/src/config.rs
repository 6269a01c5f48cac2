//! Tunables for both roles.
//!
//! Defaults match the protocol constants; the CLI overrides them per run.

use crate::retry::RetryPolicy;

/// Settings for a [`crate::client::Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Budget for the handshake, each uploaded chunk, and FIN.
    pub retry: RetryPolicy,
    /// Sequence number carried by the SYN and the first chunk.
    pub initial_seq: u64,
    /// Consecutive empty receive windows after which a download is considered
    /// lost.  The server gives up on a chunk after its own retry budget, so
    /// this should cover at least that long.
    pub idle_windows: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::INITIATOR,
            initial_seq: 0,
            idle_windows: 10,
        }
    }
}

impl ClientConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_initial_seq(mut self, seq: u64) -> Self {
        self.initial_seq = seq;
        self
    }

    pub fn with_idle_windows(mut self, windows: u32) -> Self {
        self.idle_windows = windows;
        self
    }
}

/// Settings for a [`crate::server::Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Budget for each pushed chunk and the closing FIN; `timeout` is also the
    /// idle receive window of the main loop.
    pub retry: RetryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::RESPONDER,
        }
    }
}

impl ServerConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
