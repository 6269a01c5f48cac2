//! Optional network simulator for deterministic testing.
//!
//! Real networks drop and duplicate packets.  To exercise the reliability
//! mechanisms without depending on actual network conditions, this module
//! provides a [`Simulator`] that wraps any [`Transport`] and intercepts sends,
//! applying a configurable fault model:
//!
//! | Fault            | Description                                          |
//! |------------------|------------------------------------------------------|
//! | Packet loss      | Drop an outbound frame with probability `loss_rate`. |
//! | Nth drop         | Drop every Nth outbound frame of one [`FrameType`].  |
//! | Duplication      | Deliver an outbound frame twice.                     |
//!
//! Every outbound frame is recorded in a send log, dropped or not, so tests
//! can count transmissions.  Randomness comes from a seeded RNG so failures
//! are reproducible.

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::{Frame, FrameType};
use crate::socket::{SocketError, Transport};

/// Drop every `every`-th outbound frame of type `kind` (counting from 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropRule {
    pub kind: FrameType,
    pub every: u32,
}

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`; values outside are clamped.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given outbound frame is silently dropped.
    pub loss_rate: f64,
    /// Probability that an outbound frame is sent twice.
    pub duplicate_rate: f64,
    /// Deterministic drop pattern applied on top of `loss_rate`.
    pub drop_rule: Option<DropRule>,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            drop_rule: None,
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_duplicate_rate(mut self, rate: f64) -> Self {
        self.duplicate_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn drop_every(mut self, kind: FrameType, every: u32) -> Self {
        self.drop_rule = Some(DropRule { kind, every });
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// One entry of the send log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub kind: FrameType,
    pub seq: u64,
    pub len: usize,
    pub dest: SocketAddr,
    /// `true` when the simulator swallowed the frame.
    pub dropped: bool,
}

#[derive(Debug)]
struct FaultState {
    rng: StdRng,
    rule_count: u32,
    log: Vec<SentFrame>,
}

/// A fault-injecting wrapper around a [`Transport`].
#[derive(Debug)]
pub struct Simulator<T> {
    inner: T,
    config: SimulatorConfig,
    state: Mutex<FaultState>,
}

impl<T: Transport> Simulator<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Self {
        let state = FaultState {
            rng: StdRng::seed_from_u64(config.seed),
            rule_count: 0,
            log: Vec::new(),
        };
        Self {
            inner,
            config,
            state: Mutex::new(state),
        }
    }

    /// Pass-through simulator that only records traffic.
    pub fn recording(inner: T) -> Self {
        Self::new(inner, SimulatorConfig::default())
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Snapshot of every frame handed to [`Transport::send_to`] so far.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.lock().log.clone()
    }

    /// Number of frames of `kind` the caller tried to send.
    pub fn sent_count(&self, kind: FrameType) -> usize {
        self.lock().log.iter().filter(|s| s.kind == kind).count()
    }

    fn lock(&self) -> MutexGuard<'_, FaultState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide the fate of one outbound frame: `(dropped, duplicated)`.
    fn judge(&self, frame: &Frame, dest: SocketAddr) -> (bool, bool) {
        let mut state = self.lock();

        let mut dropped = false;
        if let Some(rule) = self.config.drop_rule {
            if rule.kind == frame.kind() && rule.every > 0 {
                state.rule_count += 1;
                dropped = state.rule_count % rule.every == 0;
            }
        }
        if !dropped && self.config.loss_rate > 0.0 {
            dropped = state.rng.gen_bool(self.config.loss_rate);
        }
        let duplicated =
            !dropped && self.config.duplicate_rate > 0.0 && state.rng.gen_bool(self.config.duplicate_rate);

        state.log.push(SentFrame {
            kind: frame.kind(),
            seq: frame.seq(),
            len: frame.payload().len(),
            dest,
            dropped,
        });
        (dropped, duplicated)
    }
}

impl<T: Transport> Transport for Simulator<T> {
    async fn send_to(&self, frame: &Frame, dest: SocketAddr) -> Result<(), SocketError> {
        let (dropped, duplicated) = self.judge(frame, dest);
        if dropped {
            log::debug!("[sim] dropped {frame} → {dest}");
            return Ok(());
        }
        self.inner.send_to(frame, dest).await?;
        if duplicated {
            log::debug!("[sim] duplicated {frame} → {dest}");
            self.inner.send_to(frame, dest).await?;
        }
        Ok(())
    }

    async fn recv_timeout(
        &self,
        wait: Duration,
    ) -> Result<Option<(Frame, SocketAddr)>, SocketError> {
        self.inner.recv_timeout(wait).await
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}
