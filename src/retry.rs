//! Reconnect policy.
//!
//! Channels reconnect on a fixed interval with a bounded number of
//! consecutive attempts. There is no exponential growth and no jitter: live
//! market streams prefer a predictable cadence over spreading load.

use std::time::Duration;

use tracing::debug;

/// Policy controlling automatic reconnects after a channel closes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether reconnects are scheduled at all.
    pub enabled: bool,
    /// Fixed delay between a close and the next connect attempt.
    pub interval: Duration,
    /// Maximum number of consecutive reconnects scheduled without a
    /// successful open.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Returns a policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Decides whether another reconnect may be scheduled.
    ///
    /// `retry_count` is the number of reconnects already scheduled since the
    /// last successful open. Returns the delay to wait when a reconnect is
    /// allowed.
    pub fn next_delay(&self, retry_count: u32) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        if retry_count >= self.max_attempts {
            debug!(
                event = "reconnect_budget_spent",
                retry_count,
                max_attempts = self.max_attempts
            );
            return None;
        }
        Some(self.interval)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(5_000),
            max_attempts: 10,
        }
    }
}
