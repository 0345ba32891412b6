use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect policy as named in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStrategyKind {
    #[default]
    Fixed,
    Exponential,
}

/// Delay between broker connection attempts.
///
/// Retries are unbounded; the subscriber asks for the delay of each
/// consecutive failed attempt (starting at 1) and resets its counter once the
/// broker acknowledges a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStrategy {
    /// Same delay after every failure
    Fixed { interval: Duration },
    /// Doubles the delay after every consecutive failure, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

impl ReconnectStrategy {
    pub fn new(kind: ReconnectStrategyKind, interval: Duration, max_interval: Duration) -> Self {
        match kind {
            ReconnectStrategyKind::Fixed => ReconnectStrategy::Fixed { interval },
            ReconnectStrategyKind::Exponential => ReconnectStrategy::Exponential {
                initial: interval,
                max: max_interval.max(interval),
            },
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectStrategy::Fixed { interval } => interval,
            ReconnectStrategy::Exponential { initial, max } => {
                let exponent = attempt.saturating_sub(1);
                2u32.checked_pow(exponent)
                    .and_then(|factor| initial.checked_mul(factor))
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        ReconnectStrategy::Fixed {
            interval: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_never_grows() {
        let strategy = ReconnectStrategy::new(
            ReconnectStrategyKind::Fixed,
            Duration::from_secs(10),
            Duration::from_secs(300),
        );

        for attempt in [1, 2, 10, u32::MAX] {
            assert_eq!(strategy.delay(attempt), Duration::from_secs(10));
        }
    }

    #[test]
    fn test_exponential_delay_doubles_until_cap() {
        let strategy = ReconnectStrategy::new(
            ReconnectStrategyKind::Exponential,
            Duration::from_secs(10),
            Duration::from_secs(60),
        );

        assert_eq!(strategy.delay(1), Duration::from_secs(10));
        assert_eq!(strategy.delay(2), Duration::from_secs(20));
        assert_eq!(strategy.delay(3), Duration::from_secs(40));
        assert_eq!(strategy.delay(4), Duration::from_secs(60));
        assert_eq!(strategy.delay(40), Duration::from_secs(60));
        assert_eq!(strategy.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_exponential_cap_below_interval_uses_interval() {
        let strategy = ReconnectStrategy::new(
            ReconnectStrategyKind::Exponential,
            Duration::from_secs(30),
            Duration::from_secs(5),
        );

        assert_eq!(strategy.delay(1), Duration::from_secs(30));
        assert_eq!(strategy.delay(5), Duration::from_secs(30));
    }

    #[test]
    fn test_kind_deserializes_lowercase() {
        let kind: ReconnectStrategyKind = serde_json::from_str("\"exponential\"").unwrap();
        assert_eq!(kind, ReconnectStrategyKind::Exponential);
        assert_eq!(ReconnectStrategyKind::default(), ReconnectStrategyKind::Fixed);
    }
}
