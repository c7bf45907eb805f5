//! Delay policy between attempts of a monitored operation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            strategy: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl BackoffConfig {
    /// Creates a new backoff config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that never sleeps between attempts.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            strategy: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Per-call backoff bookkeeping.
///
/// One state lives for the duration of a single monitored call; it is never
/// shared between calls.
#[derive(Debug, Default)]
pub struct BackoffState {
    /// Retries scheduled so far.
    pub retries: u32,
    previous_delay_ms: Option<u64>,
}

impl BackoffState {
    /// Creates a new state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the delay before the next retry and advances the state.
    pub fn next_delay(&mut self, config: &BackoffConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let retry = self.retries;

        let delay = match config.strategy {
            BackoffStrategy::Exponential => base
                .saturating_mul(2u64.saturating_pow(retry))
                .min(max),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        // ThreadRng is !Send; keep it scoped to this synchronous call.
        let mut rng = rand::thread_rng();
        let jittered = match config.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rng.gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rng.gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delay_ms.unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                if upper <= base {
                    base.min(max)
                } else {
                    rng.gen_range(base..=upper)
                }
            }
        };

        self.previous_delay_ms = Some(jittered);
        self.retries += 1;
        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(strategy: BackoffStrategy) -> BackoffConfig {
        BackoffConfig::new()
            .with_base_delay_ms(100)
            .with_strategy(strategy)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_defaults() {
        let config = BackoffConfig::default();
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30000);
        assert_eq!(config.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.jitter, JitterStrategy::Full);
    }

    #[test]
    fn test_exponential_no_jitter() {
        let config = no_jitter(BackoffStrategy::Exponential);
        let mut state = BackoffState::new();

        assert_eq!(state.next_delay(&config), Duration::from_millis(100));
        assert_eq!(state.next_delay(&config), Duration::from_millis(200));
        assert_eq!(state.next_delay(&config), Duration::from_millis(400));
        assert_eq!(state.retries, 3);
    }

    #[test]
    fn test_linear_no_jitter() {
        let config = no_jitter(BackoffStrategy::Linear);
        let mut state = BackoffState::new();

        assert_eq!(state.next_delay(&config), Duration::from_millis(100));
        assert_eq!(state.next_delay(&config), Duration::from_millis(200));
        assert_eq!(state.next_delay(&config), Duration::from_millis(300));
    }

    #[test]
    fn test_constant_no_jitter() {
        let config = no_jitter(BackoffStrategy::Constant);
        let mut state = BackoffState::new();
        state.retries = 5;

        assert_eq!(state.next_delay(&config), Duration::from_millis(100));
    }

    #[test]
    fn test_capped_at_max() {
        let config = no_jitter(BackoffStrategy::Exponential).with_max_delay_ms(500);
        let mut state = BackoffState::new();
        state.retries = 10;

        assert_eq!(state.next_delay(&config), Duration::from_millis(500));
    }

    #[test]
    fn test_full_jitter_bounds() {
        let config = BackoffConfig::new()
            .with_base_delay_ms(100)
            .with_strategy(BackoffStrategy::Constant);

        for _ in 0..50 {
            let mut state = BackoffState::new();
            assert!(state.next_delay(&config) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_decorrelated_stays_within_cap() {
        let config = BackoffConfig::new()
            .with_base_delay_ms(10)
            .with_max_delay_ms(100)
            .with_jitter(JitterStrategy::Decorrelated);
        let mut state = BackoffState::new();

        for _ in 0..20 {
            let delay = state.next_delay(&config);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_immediate() {
        let config = BackoffConfig::immediate();
        let mut state = BackoffState::new();
        assert_eq!(state.next_delay(&config), Duration::ZERO);
        assert_eq!(state.next_delay(&config), Duration::ZERO);
    }
}
