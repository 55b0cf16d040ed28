//! # Reconnect schedule
//!
//! A counted, cancellable retry schedule for the connection manager:
//!
//! 1. [`ReconnectSchedule::next_attempt`] hands out attempt numbers `1..=max`
//! 2. [`ReconnectSchedule::wait`] sleeps `interval` on the tokio clock, or
//!    returns early when the cancellation token fires
//! 3. [`ReconnectSchedule::reset`] zeroes the counter after a success
//!
//! The wait uses `tokio::time::sleep`, so tests drive it deterministically
//! with `#[tokio::test(start_paused = true)]`.

use std::time::Duration;

use sluice_settings::ConnectionSettings;
use tokio_util::sync::CancellationToken;

/// Bounded reconnection schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectSchedule {
    max_attempts: u32,
    interval: Duration,
    attempts: u32,
}

impl ReconnectSchedule {
    /// Schedule allowing `max_attempts` attempts spaced by `interval`.
    #[must_use]
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            attempts: 0,
        }
    }

    /// Schedule built from connection settings.
    #[must_use]
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self::new(
            settings.max_reconnect_attempts,
            Duration::from_millis(settings.reconnect_interval_ms),
        )
    }

    /// Claim the next attempt number, or `None` once the budget is spent.
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }

    /// Attempts claimed so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured attempt budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before each attempt.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Back to zero attempts.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Sleep one interval. Returns `false` if `cancel` fired first.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            () = tokio::time::sleep(self.interval) => true,
            () = cancel.cancelled() => false,
        }
    }
}
