//! Outbox — ordered send queue with exponential backoff.
//!
//! Every outbound frame goes through the outbox so per-topic order is kept
//! even while the transport is down. A failed send leaves the frame at the
//! head of the queue; the next attempt is scheduled `base * 2^(n-1)` later
//! (capped at `max`) plus random jitter. After `max_failures` consecutive
//! failures the status becomes `Disconnected`; retries continue at the
//! capped interval.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use super::{ConnectionStatus, Transport, TransportError};
use crate::config::BackoffConfig;
use crate::frame::Frame;
use crate::ids::RoomId;

pub struct Outbox {
    queue: VecDeque<Frame>,
    config: BackoffConfig,
    failures: u32,
    retry_at: Option<Instant>,
}

impl Outbox {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { queue: VecDeque::new(), config, failures: 0, retry_at: None }
    }

    pub fn push(&mut self, frame: Frame) {
        self.queue.push_back(frame);
    }

    /// Queue a frame ahead of everything already waiting.
    pub fn push_front(&mut self, frame: Frame) {
        self.queue.push_front(frame);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        if self.failures == 0 {
            ConnectionStatus::Connected
        } else if self.failures < self.config.max_failures {
            ConnectionStatus::Reconnecting
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Send queued frames in order until the queue is empty or a send fails.
    /// Does nothing before the scheduled retry time.
    ///
    /// Frames rejected with a non-retryable error are dropped so they cannot
    /// wedge the queue.
    pub async fn flush(&mut self, transport: &dyn Transport, now: Instant) -> ConnectionStatus {
        if self.retry_at.is_some_and(|at| now < at) {
            return self.status();
        }
        while let Some(frame) = self.queue.pop_front() {
            match transport.send(frame.clone()).await {
                Ok(()) => {
                    if self.failures > 0 {
                        info!(failures = self.failures, "outbox: transport recovered");
                    }
                    self.failures = 0;
                    self.retry_at = None;
                }
                Err(TransportError::Unavailable) => {
                    self.queue.push_front(frame);
                    self.failures = self.failures.saturating_add(1);
                    let delay = backoff_delay(&self.config, self.failures);
                    self.retry_at = Some(now + delay);
                    warn!(
                        failures = self.failures,
                        queued = self.queue.len(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "outbox: send failed, backing off"
                    );
                    break;
                }
                Err(e) => {
                    warn!(error = %e, syscall = %frame.syscall, "outbox: frame dropped");
                }
            }
        }
        self.status()
    }

    /// Forget failure history and retry immediately (transport reconnected).
    pub fn reset(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }

    /// Drop queued frames addressed to `room`. Returns how many were dropped.
    pub fn drain_room(&mut self, room: &RoomId) -> usize {
        let before = self.queue.len();
        self.queue.retain(|f| f.room.as_ref() != Some(room));
        let dropped = before - self.queue.len();
        if dropped > 0 {
            debug!(%room, dropped, "outbox: dropped queued frames for room");
        }
        dropped
    }
}

/// Delay before retry number `failures` (1-based).
#[must_use]
pub fn backoff_delay(config: &BackoffConfig, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let base = config.base.saturating_mul(1_u32 << exponent).min(config.max);
    let jitter_ms = u64::try_from(config.jitter.as_millis()).unwrap_or(0);
    let jitter = if jitter_ms == 0 { 0 } else { rand::rng().random_range(0..=jitter_ms) };
    base + Duration::from_millis(jitter)
}

#[cfg(test)]
#[path = "outbox_test.rs"]
mod tests;
