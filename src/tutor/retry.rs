//! Retry policy and failure classification for tutor service calls

use std::time::Duration;

/// Retry policy for speech synthesis
///
/// Synthesis is retried a fixed number of times with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Delay before the first retry (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Whether an HTTP status and body indicate an exhausted quota
///
/// The service reports this as 429 or as a `RESOURCE_EXHAUSTED` status
/// in the error body.
#[must_use]
pub fn is_quota_exhausted(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }

    let lower = body.to_lowercase();
    lower.contains("resource_exhausted") || lower.contains("quota")
}
