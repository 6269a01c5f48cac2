//! Shared loopback fixtures for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use files_over_udp::server::{Server, SessionEvent};
use files_over_udp::storage::FileStore;
use files_over_udp::{ClientConfig, RetryPolicy, ServerConfig, Socket, Transport};
use tokio::task::JoinHandle;

/// Upper bound for any single test scenario.
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(30);

/// Short windows so lossy scenarios finish quickly.
pub const FAST: RetryPolicy = RetryPolicy::new(5, Duration::from_millis(100));

pub fn fast_client() -> ClientConfig {
    ClientConfig::default().with_retry(FAST)
}

pub fn fast_server() -> ServerConfig {
    ServerConfig::default().with_retry(FAST)
}

/// Bind a socket on an OS-chosen loopback port.
pub async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

/// Run `server` in a background task until one transfer reaches a terminal
/// event, then hand back the server and every event it produced.
pub fn serve_one<T, S>(mut server: Server<T, S>) -> JoinHandle<(Server<T, S>, Vec<SessionEvent>)>
where
    T: Transport + 'static,
    S: FileStore + 'static,
    S::Reader: 'static,
    S::Writer: 'static,
{
    tokio::spawn(async move {
        let mut events = Vec::new();
        loop {
            let Some(event) = server.poll_once().await.expect("server transport failed") else {
                continue;
            };
            let done = !matches!(event, SessionEvent::Opened { .. });
            events.push(event);
            if done {
                return (server, events);
            }
        }
    })
}

/// Deterministic, non-repeating test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
