use std::time::Duration;

/// How often a failed run is re-attempted, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_RETRIES: u32 = 1;
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(3 * 60);

    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Fail on the first error.
    pub fn none() -> Self {
        Self { retries: 0, delay: Duration::ZERO }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RETRIES, Self::DEFAULT_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_one_retry_after_three_minutes() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.delay, Duration::from_secs(180));
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }
}
