//! Delay selection between polls.

use std::time::Duration;

use crate::config::PollerConfig;
use crate::source::Recommendation;

/// Picks the pause before the next query.
///
/// A recognized server recommendation maps to a fixed tier. Otherwise the
/// delay grows exponentially with consecutive empty polls up to a ceiling.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    factor: f64,
    ceiling: Duration,
    aggressive: Duration,
    moderate: Duration,
    gentle: Duration,
}

impl BackoffPolicy {
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            base: config.base_delay,
            factor: config.growth_factor.max(1.0),
            ceiling: config.max_delay.max(config.base_delay),
            aggressive: config.aggressive_delay,
            moderate: config.moderate_delay,
            gentle: config.gentle_delay,
        }
    }

    pub fn next_delay(&self, hint: Option<&Recommendation>, empty_polls: u32) -> Duration {
        match hint {
            Some(Recommendation::Aggressive) => self.aggressive,
            Some(Recommendation::Moderate) => self.moderate,
            Some(Recommendation::Gentle) => self.gentle,
            Some(Recommendation::Stop) | Some(Recommendation::Unrecognized(_)) | None => {
                self.fallback(empty_polls)
            }
        }
    }

    /// `min(base * factor^empty_polls, ceiling)`.
    pub fn fallback(&self, empty_polls: u32) -> Duration {
        let exponent = i32::try_from(empty_polls).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.ceiling.as_secs_f64() {
            return self.ceiling;
        }
        Duration::from_secs_f64(scaled).min(self.ceiling)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(&PollerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_hints_use_fixed_tiers() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.next_delay(Some(&Recommendation::Aggressive), 7),
            Duration::from_millis(1_000)
        );
        assert_eq!(
            policy.next_delay(Some(&Recommendation::Moderate), 0),
            Duration::from_millis(2_500)
        );
        assert_eq!(
            policy.next_delay(Some(&Recommendation::Gentle), 3),
            Duration::from_millis(5_000)
        );
    }

    #[test]
    fn fallback_follows_exponential_curve() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.next_delay(None, 0), Duration::from_millis(1_000));
        assert_eq!(policy.next_delay(None, 1), Duration::from_millis(1_500));
        assert_eq!(policy.next_delay(None, 2), Duration::from_millis(2_250));
    }

    #[test]
    fn unrecognized_hint_falls_back() {
        let policy = BackoffPolicy::default();
        let hint = Recommendation::Unrecognized("warp".to_string());
        assert_eq!(policy.next_delay(Some(&hint), 1), policy.fallback(1));
    }

    #[test]
    fn fallback_is_monotone_and_capped() {
        let policy = BackoffPolicy::default();
        let ceiling = Duration::from_millis(10_000);
        let mut previous = Duration::ZERO;
        for n in 0..64 {
            let delay = policy.next_delay(None, n);
            assert!(delay >= previous, "delay shrank at {n}");
            assert!(delay <= ceiling, "delay exceeded ceiling at {n}");
            previous = delay;
        }
        assert_eq!(policy.next_delay(None, u32::MAX), ceiling);
    }
}
