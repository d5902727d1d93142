//! Transport configuration.

use serde::{Deserialize, Serialize};

/// Retry policy for transient send failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First back-off delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Back-off cap in milliseconds.
    pub max_backoff_ms: u64,
    /// Multiplier applied per attempt.
    pub multiplier: u32,
    /// Attempts before giving up and surfacing a transport failure.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 50,
            max_backoff_ms: 5_000,
            multiplier: 2,
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    /// Back-off before attempt `attempt` (zero-based; no delay before the
    /// first attempt).
    #[must_use]
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let factor = u64::from(self.multiplier).saturating_pow(attempt - 1);
        self.initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms)
    }
}

/// Transport configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Dedup window length in seconds.
    pub dedup_window_secs: u64,
    /// Dedup window entry cap.
    pub dedup_max_entries: usize,
    /// Deadline for one logical send, including retries, in milliseconds.
    pub send_deadline_ms: u64,
    pub retry: RetryConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 300,
            dedup_max_entries: 10_000,
            send_deadline_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_to_cap() {
        let retry = RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            multiplier: 2,
            max_attempts: 6,
        };
        assert_eq!(retry.backoff_ms(0), 0);
        assert_eq!(retry.backoff_ms(1), 100);
        assert_eq!(retry.backoff_ms(2), 200);
        assert_eq!(retry.backoff_ms(3), 400);
        assert_eq!(retry.backoff_ms(4), 500);
        assert_eq!(retry.backoff_ms(5), 500);
    }
}
