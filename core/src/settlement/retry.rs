use std::time::Duration;

use rand::Rng;

use mintbridge_config::SettlementConfig;

/// Bounded exponential backoff for the deposit visibility wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SettlementConfig) -> Self {
        Self {
            max_attempts: config.visibility_max_attempts.max(1),
            base_delay: Duration::from_millis(config.visibility_base_delay_ms),
            max_delay: Duration::from_millis(config.visibility_max_delay_ms),
            jitter: Duration::from_millis(config.visibility_jitter_ms),
        }
    }

    /// Delay after the `failures`-th failed attempt (0-based).
    /// `base * 2^failures`, capped at `max_delay`, plus up to `jitter`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.min(31);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = no_jitter();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy {
            jitter: Duration::from_millis(50),
            ..no_jitter()
        };
        for _ in 0..100 {
            let delay = policy.backoff(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_from_config() {
        let config = SettlementConfig::default();
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, config.visibility_max_attempts);
        assert_eq!(policy.base_delay, Duration::from_millis(config.visibility_base_delay_ms));
    }
}
