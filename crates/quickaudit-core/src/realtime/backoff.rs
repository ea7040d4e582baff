//! Reconnect backoff schedule.

use std::time::Duration;

/// Exponential backoff with a fixed attempt budget.
///
/// Delays double from `base`: with a 1 s base and five attempts the
/// schedule is 1, 2, 4, 8, 16 seconds, after which it is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    pub const fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let factor = 2_u32.saturating_pow(self.attempts);
        self.attempts += 1;
        Some(self.base.saturating_mul(factor))
    }

    /// Back to the floor after a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn doubles_until_exhausted() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 5);
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec()
        );
        assert_eq!(backoff.attempts(), 5);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut backoff = Backoff::new(Duration::from_millis(250), 3);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 0);
        assert_eq!(backoff.next_delay(), None);
    }
}
