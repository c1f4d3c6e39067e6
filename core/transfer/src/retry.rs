//! Retry and verification policies.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry behavior of the per-file upload and download loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per file before giving up.
    pub max_retries: u32,
    /// Cap for the exponential backoff, in seconds.
    pub max_backoff_secs: u64,
    /// Whether to sleep between attempts at all.
    pub sleep: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff_secs = max_backoff.as_secs();
        self
    }

    /// Disable sleeping between attempts.
    pub fn without_sleep(mut self) -> Self {
        self.sleep = false;
        self
    }

    /// Delay after failed attempt `attempt` (zero-based): `min(2^attempt, cap)` seconds.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(exp.min(self.max_backoff_secs))
    }

    /// Concurrency for the retry after attempt `attempt` asked for less.
    pub fn degraded_concurrency(&self, parallel: usize, attempt: u32) -> usize {
        degraded_concurrency(parallel, attempt, self.max_retries)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_backoff_secs: 16,
            sleep: true,
        }
    }
}

/// `max(1, parallel - attempt * parallel / max_retries)`.
pub fn degraded_concurrency(parallel: usize, attempt: u32, max_retries: u32) -> usize {
    if max_retries == 0 {
        return parallel.max(1);
    }
    let parallel = parallel as u64;
    let reduction = u64::from(attempt) * parallel / u64::from(max_retries);
    parallel.saturating_sub(reduction).max(1) as usize
}

/// Post-upload visibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyPolicy {
    /// Full upload attempts before the file is marked failed.
    pub outer_attempts: u32,
    /// Probes per upload before uploading again.
    pub probe_attempts: u32,
    pub probe_pause_ms: u64,
}

impl VerifyPolicy {
    pub fn with_probe_pause(mut self, pause: Duration) -> Self {
        self.probe_pause_ms = pause.as_millis() as u64;
        self
    }

    pub fn probe_pause(&self) -> Duration {
        Duration::from_millis(self.probe_pause_ms)
    }
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            outer_attempts: 10,
            probe_attempts: 10,
            probe_pause_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..7).map(|a| policy.backoff_for_attempt(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 16, 16]);
        assert_eq!(policy.backoff_for_attempt(200), Duration::from_secs(16));
    }

    #[test]
    fn test_degraded_concurrency_values() {
        assert_eq!(degraded_concurrency(10, 0, 5), 10);
        assert_eq!(degraded_concurrency(10, 1, 5), 8);
        assert_eq!(degraded_concurrency(10, 4, 5), 2);
        assert_eq!(degraded_concurrency(3, 4, 5), 1);
        assert_eq!(degraded_concurrency(1, 4, 5), 1);
        assert_eq!(degraded_concurrency(0, 0, 5), 1);
        assert_eq!(degraded_concurrency(8, 3, 0), 8);
    }

    #[test]
    fn test_policy_from_json() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"sleep": false}"#).unwrap();
        assert_eq!(policy, RetryPolicy::default().without_sleep());

        let verify: VerifyPolicy = serde_json::from_str(r#"{"probe_pause_ms": 5}"#).unwrap();
        assert_eq!(verify.probe_pause(), Duration::from_millis(5));
        assert_eq!(verify.outer_attempts, 10);
    }

    proptest! {
        #[test]
        fn prop_degradation_is_monotone_and_bounded(parallel in 1usize..512, attempt in 0u32..5) {
            let now = degraded_concurrency(parallel, attempt, 5);
            let next = degraded_concurrency(parallel, attempt + 1, 5);
            prop_assert!(now >= 1);
            prop_assert!(now <= parallel);
            prop_assert!(next <= now);
        }
    }
}
