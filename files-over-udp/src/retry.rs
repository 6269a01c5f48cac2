//! Bounded send-and-await, the one retransmission loop of the protocol.
//!
//! Every step that needs an answer (handshake, each data chunk, FIN) goes
//! through [`send_and_await`]: send a frame, wait one [`RetryPolicy::timeout`]
//! for a reply the caller accepts, and resend the same frame otherwise.  A
//! step gets at most [`RetryPolicy::max_attempts`] transmissions.
//!
//! Stop-and-wait contract: the caller never issues frame *k+1* before this
//! function has returned an acceptable reply for frame *k*.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::frame::{Frame, FrameType};
use crate::socket::{SocketError, Transport};

/// How many times to send a frame and how long to wait after each send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Client side: 5 attempts, 1 s each.
    pub const INITIATOR: Self = Self::new(5, Duration::from_millis(1000));

    /// Server side: 5 attempts, 2 s each.
    pub const RESPONDER: Self = Self::new(5, Duration::from_millis(2000));

    pub const fn new(max_attempts: u32, timeout: Duration) -> Self {
        Self {
            max_attempts,
            timeout,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    /// No acceptable reply after the whole budget.
    #[error("no acceptable reply after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error(transparent)]
    Transport(#[from] SocketError),
}

/// Send `frame` to `peer` and wait for a reply satisfying `accept`.
///
/// A receive window that elapses, a frame from another address, or a frame
/// that `accept` rejects all count as a failed attempt and trigger a resend
/// of the unchanged frame.
pub async fn send_and_await<T, F>(
    transport: &T,
    frame: &Frame,
    peer: SocketAddr,
    policy: &RetryPolicy,
    mut accept: F,
) -> Result<Frame, RetryError>
where
    T: Transport,
    F: FnMut(&Frame) -> bool + Send,
{
    for attempt in 1..=policy.max_attempts {
        transport.send_to(frame, peer).await?;
        if attempt > 1 {
            log::debug!("[retry] resent {frame} to {peer} (attempt {attempt})");
        }

        match transport.recv_timeout(policy.timeout).await? {
            Some((reply, from)) if from == peer && accept(&reply) => return Ok(reply),
            Some((reply, from)) => {
                log::debug!("[retry] unexpected {reply} from {from} while awaiting reply to {frame}");
            }
            None => log::trace!("[retry] no reply to {frame} within {:?}", policy.timeout),
        }
    }

    Err(RetryError::Timeout {
        attempts: policy.max_attempts,
    })
}

/// `true` when `frame` acknowledges the data chunk sent at `seq`.
///
/// A receiver acknowledges an in-order chunk with its own sequence number.
/// A receiver that already stored `seq` re-affirms the next expected value,
/// `seq + 1`, when the chunk arrives again; that also proves delivery.
pub fn is_chunk_ack(frame: &Frame, seq: u64) -> bool {
    frame.kind() == FrameType::Ack
        && (frame.seq() == seq || Some(frame.seq()) == seq.checked_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::Simulator;
    use crate::socket::Socket;

    const FAST: RetryPolicy = RetryPolicy::new(3, Duration::from_millis(40));

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[test]
    fn chunk_ack_accepts_own_and_next_sequence() {
        assert!(is_chunk_ack(&Frame::ack(4), 4));
        assert!(is_chunk_ack(&Frame::ack(5), 4));
        assert!(!is_chunk_ack(&Frame::ack(3), 4));
        assert!(!is_chunk_ack(&Frame::ack(6), 4));
        assert!(!is_chunk_ack(&Frame::fin(4), 4));
    }

    #[tokio::test]
    async fn silent_peer_exhausts_the_budget() {
        let silent = loopback().await;
        let sim = Simulator::recording(loopback().await);

        let result = send_and_await(&sim, &Frame::fin(1), silent.local_addr, &FAST, |_| true).await;

        assert!(matches!(result, Err(RetryError::Timeout { attempts: 3 })));
        assert_eq!(sim.sent_count(FrameType::Fin), 3);
    }

    #[tokio::test]
    async fn returns_first_accepted_reply() {
        let peer = loopback().await;
        let peer_addr = peer.local_addr;
        let sim = Simulator::recording(loopback().await);
        let me = sim.local_addr();

        let responder = tokio::spawn(async move {
            // Reply with something unacceptable first, then the real answer.
            let (frame, from) = peer.recv_timeout(Duration::from_secs(2)).await.unwrap().unwrap();
            assert_eq!(from, me);
            peer.send_to(&Frame::ack(frame.seq() + 7), from).await.unwrap();
            let (frame, from) = peer.recv_timeout(Duration::from_secs(2)).await.unwrap().unwrap();
            peer.send_to(&Frame::ack(frame.seq()), from).await.unwrap();
        });

        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        let reply = send_and_await(&sim, &Frame::fin(2), peer_addr, &policy, |f| {
            f.kind() == FrameType::Ack && f.seq() == 2
        })
        .await
        .unwrap();

        assert_eq!(reply, Frame::ack(2));
        assert_eq!(sim.sent_count(FrameType::Fin), 2);
        responder.await.unwrap();
    }
}
