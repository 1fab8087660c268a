use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect policy of a long-lived sink client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// `None` or `Some(0)` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "RetryPolicy::default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "RetryPolicy::default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "RetryPolicy::default_randomization_factor")]
    pub randomization_factor: f64,
    #[serde(default = "RetryPolicy::default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_interval_ms: Self::default_initial_interval_ms(),
            max_interval_ms: Self::default_max_interval_ms(),
            randomization_factor: Self::default_randomization_factor(),
            multiplier: Self::default_multiplier(),
        }
    }
}

impl RetryPolicy {
    fn default_initial_interval_ms() -> u64 {
        1_000
    }

    fn default_max_interval_ms() -> u64 {
        60_000
    }

    fn default_randomization_factor() -> f64 {
        0.2
    }

    fn default_multiplier() -> f64 {
        2.0
    }

    #[inline]
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            None | Some(0) => true,
            Some(max) => attempt < max,
        }
    }
}

/// Reconnect loops never give up on elapsed time, only on `max_attempts`.
pub fn build_exponential_backoff(policy: &RetryPolicy) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(policy.initial_interval_ms.max(1)),
        max_interval: Duration::from_millis(policy.max_interval_ms.max(policy.initial_interval_ms)),
        randomization_factor: policy.randomization_factor.clamp(0.0, 1.0),
        multiplier: policy.multiplier.max(1.0),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Backoff;

    #[test]
    fn unlimited_by_default() {
        let p = RetryPolicy::default();
        assert!(p.should_retry(10_000));
        let bounded = RetryPolicy {
            max_attempts: Some(2),
            ..p
        };
        assert!(bounded.should_retry(1));
        assert!(!bounded.should_retry(2));
    }

    #[test]
    fn backoff_is_capped() {
        let p = RetryPolicy {
            initial_interval_ms: 10,
            max_interval_ms: 40,
            randomization_factor: 0.0,
            ..Default::default()
        };
        let mut bo = build_exponential_backoff(&p);
        let delays: Vec<_> = (0..5).filter_map(|_| bo.next_backoff()).collect();
        assert_eq!(delays.len(), 5);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(40)));
    }
}
