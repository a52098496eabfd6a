//! # Fibonacci Backoff
//!
//! Delays the next reconciliation pass after a failed one.
//! The delay grows more slowly than exponential backoff, so a cloud outage
//! is retried promptly at first without hammering the API later on.
//!
//! Sequence with the defaults (30s min, 600s max): 30s, 30s, 60s, 90s, 150s,
//! 240s, 390s, 600s (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff in seconds (for reset)
    min_secs: u64,
    /// Previous backoff in seconds
    prev_secs: u64,
    /// Current backoff in seconds
    current_secs: u64,
    /// Maximum backoff in seconds
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff between `min` and `max`
    ///
    /// Sub-second parts are dropped; a zero `min` is raised to one second
    /// so the sequence still grows.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_secs = min.as_secs().max(1);
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs: max.as_secs().max(min_secs),
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_secs;

        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = std::cmp::min(next, self.max_secs);

        Duration::from_secs(result)
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(backoff: &mut FibonacciBackoff) -> u64 {
        backoff.next_backoff().as_secs()
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(30), Duration::from_secs(600));

        assert_eq!(secs(&mut backoff), 30);
        assert_eq!(secs(&mut backoff), 30);
        assert_eq!(secs(&mut backoff), 60);
        assert_eq!(secs(&mut backoff), 90);
        assert_eq!(secs(&mut backoff), 150);
        assert_eq!(secs(&mut backoff), 240);
        assert_eq!(secs(&mut backoff), 390);
        assert_eq!(secs(&mut backoff), 600); // 630 capped
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(5));

        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 2);
        assert_eq!(secs(&mut backoff), 3);
        assert_eq!(secs(&mut backoff), 5);
        // Should stay at max
        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 5);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(30), Duration::from_secs(600));

        assert_eq!(secs(&mut backoff), 30);
        assert_eq!(secs(&mut backoff), 30);
        assert_eq!(secs(&mut backoff), 60);

        backoff.reset();

        // Should restart from beginning after success
        assert_eq!(secs(&mut backoff), 30);
        assert_eq!(secs(&mut backoff), 30);
        assert_eq!(secs(&mut backoff), 60);
    }

    #[test]
    fn test_fibonacci_backoff_degenerate_bounds() {
        let mut backoff = FibonacciBackoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 1);
    }
}
