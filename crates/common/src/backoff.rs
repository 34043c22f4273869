use std::time::Duration;

/// Fixed-delay retry schedule with a bounded number of attempts.
///
/// Every retry waits the same `delay`; after `max_attempts` retries the
/// schedule is exhausted and [`next_delay`](Self::next_delay) returns `None`.
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_attempts: 5,
            attempt: 0,
        }
    }
}

impl FixedBackoff {
    /// Create a new FixedBackoff.
    ///
    /// # Arguments
    /// * `delay` - Wait before every retry
    /// * `max_attempts` - Number of retries allowed before giving up
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// Consume one retry and return how long to wait before it.
    ///
    /// Returns `None` once the budget is spent; the counter stays at `max_attempts`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.delay)
    }

    /// Reset the attempt counter (call after a successful connection).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Get current attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether every retry has been used.
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
