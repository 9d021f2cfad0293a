//! Reconnect policy and retry bookkeeping.
//!
//! The helpers in this module are transport-agnostic: they only decide
//! whether another attempt is allowed and how long to wait before it.

use std::time::Duration;

use tracing::debug;

/// Default number of reconnects after an unexpected closure.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Default delay before the first reconnect.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Policy controlling reconnect attempts and exponential backoff behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnects between two successful opens.
    pub max_retries: u32,
    /// Delay used before the first reconnect; doubled for each later one.
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Returns whether a reconnect is allowed after `attempt` prior ones.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Computes the delay before the reconnect following `attempt` prior ones.
    ///
    /// `attempt` is 0-based: 0 yields the base delay, 1 twice that, and so on.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY)
    }
}

/// Attempt counter kept for the lifetime of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
}

impl RetryState {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Clears the counter after a channel reached the open state.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consumes one unit of retry budget.
    ///
    /// Returns the backoff delay to wait before reconnecting, or `None` once
    /// the budget is spent.
    pub fn schedule(&mut self, policy: &ReconnectPolicy) -> Option<Duration> {
        if !policy.should_retry(self.attempt) {
            debug!(
                event = "reconnect_budget_exhausted",
                attempt = self.attempt,
                max_retries = policy.max_retries
            );
            return None;
        }

        let delay = policy.delay_for_attempt(self.attempt);
        self.attempt += 1;
        debug!(
            event = "reconnect_scheduled",
            attempt = self.attempt,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64
        );
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ReconnectPolicy, RetryState};

    #[test]
    fn default_budget_yields_two_doubling_delays() {
        let policy = ReconnectPolicy::default();
        let mut state = RetryState::default();

        assert_eq!(state.schedule(&policy), Some(Duration::from_millis(500)));
        assert_eq!(state.schedule(&policy), Some(Duration::from_millis(1000)));
        assert_eq!(state.schedule(&policy), None);
        assert_eq!(state.schedule(&policy), None);
        assert_eq!(state.attempt(), 2);
    }

    #[test]
    fn successful_open_restarts_backoff_at_base_delay() {
        let policy = ReconnectPolicy::default();
        let mut state = RetryState::default();

        assert_eq!(state.schedule(&policy), Some(Duration::from_millis(500)));
        state.reset();
        assert_eq!(state.schedule(&policy), Some(Duration::from_millis(500)));
        assert_eq!(state.schedule(&policy), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn delays_grow_exponentially() {
        let policy = ReconnectPolicy::new(5, Duration::from_millis(500));
        let delays: Vec<u64> = (0..5)
            .map(|attempt| policy.delay_for_attempt(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000]);
    }

    #[test]
    fn huge_attempt_saturates_instead_of_overflowing() {
        let policy = ReconnectPolicy::new(u32::MAX, Duration::from_secs(1));
        assert_eq!(
            policy.delay_for_attempt(40),
            Duration::from_secs(1).saturating_mul(u32::MAX)
        );
    }

    #[test]
    fn zero_budget_never_retries() {
        let policy = ReconnectPolicy::new(0, Duration::from_millis(500));
        let mut state = RetryState::default();
        assert!(!policy.should_retry(0));
        assert_eq!(state.schedule(&policy), None);
    }
}
