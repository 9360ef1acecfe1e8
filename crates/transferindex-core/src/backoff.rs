//! Exponential backoff shared by every retry and reconnect wait.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stateless backoff policy: computes the delay before the next attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub initial: Duration,
    /// Cap on exponential growth.
    #[serde(with = "millis")]
    pub max: Duration,
    /// Multiplier applied to the delay on each retry.
    pub multiplier: f64,
    /// Maximum number of retries (`None` = retry forever).
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    /// Same delay before every attempt, retried forever.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    /// Retry forever with the given bounds.
    pub fn unbounded(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` once `attempt` exceeds `max_attempts`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        let exp = attempt.saturating_sub(1).min(64) as i32;
        let base_ms = self.initial.as_millis() as f64 * self.multiplier.max(1.0).powi(exp);
        let cap_ms = self.max.as_millis() as f64;
        Some(Duration::from_millis(base_ms.min(cap_ms) as u64))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_growth() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: Some(3),
        };
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(400)));
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = BackoffPolicy::unbounded(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.next_delay(10), Some(Duration::from_millis(500)));
        // unbounded policies never give up
        assert!(policy.next_delay(10_000).is_some());
    }

    #[test]
    fn fixed_delay() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(15));
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(15)));
        assert_eq!(policy.next_delay(7), Some(Duration::from_secs(15)));
    }

    #[test]
    fn serde_uses_milliseconds() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(1500));
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["initial"], 1500);
        let back: BackoffPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }
}
