use std::time::Duration;

use parley_settings::ReconnectSettings;

/// Reconnect schedule: `min(base * 2^attempt, max)` for attempts
/// `0..max_attempts`, then give up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_attempts: 5,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(s: &ReconnectSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            max_attempts: s.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (zero-based), or `None`
    /// once the budget of consecutive failures is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential = base_ms.saturating_mul(1u64 << attempt.min(31));
        let capped = exponential.min(self.max_delay.as_millis() as u64);
        Some(Duration::from_millis(capped))
    }

    /// Every delay this policy will ever produce, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).filter_map(|a| self.delay_for(a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        let ms: Vec<u128> = policy.schedule().iter().map(Duration::as_millis).collect();
        assert_eq!(ms, vec![1000, 2000, 4000, 8000, 10_000]);
    }

    #[test]
    fn no_delay_after_budget_spent() {
        let policy = ReconnectPolicy::default();
        assert!(policy.delay_for(4).is_some());
        assert_eq!(policy.delay_for(5), None);
        assert_eq!(policy.delay_for(40), None);
    }

    #[test]
    fn huge_attempts_do_not_overflow() {
        let policy = ReconnectPolicy {
            max_attempts: u32::MAX,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(63), Some(Duration::from_millis(10_000)));
    }

    #[test]
    fn zero_budget_never_retries() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(policy.schedule().is_empty());
    }

    #[test]
    fn built_from_settings() {
        let settings = ReconnectSettings {
            base_delay_ms: 250,
            max_delay_ms: 1000,
            max_attempts: 3,
        };
        let policy = ReconnectPolicy::from(&settings);
        let ms: Vec<u128> = policy.schedule().iter().map(Duration::as_millis).collect();
        assert_eq!(ms, vec![250, 500, 1000]);
    }
}
