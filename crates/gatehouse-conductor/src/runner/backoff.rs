use gatehouse_core::config::RetryConfig;
use gatehouse_core::RetryStrategy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

/// Delay between executor attempts.
pub struct BackoffPolicy {
    strategy: RetryStrategy,
    base: Duration,
    max: Duration,
    jitter_ratio: f64,
    rng: Mutex<StdRng>,
}

impl BackoffPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            strategy: cfg.strategy,
            base: Duration::from_millis(cfg.base_delay_ms),
            max: Duration::from_millis(cfg.max_delay_ms),
            jitter_ratio: cfg.jitter_ratio,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            base: delay,
            max: delay,
            jitter_ratio: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    pub fn exponential(base: Duration, max: Duration, jitter_ratio: f64) -> Self {
        Self {
            strategy: RetryStrategy::ExponentialJitter,
            base,
            max,
            jitter_ratio,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic jitter for tests.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = match self.strategy {
            RetryStrategy::Fixed => self.base,
            RetryStrategy::ExponentialJitter => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                let raw = self.base.saturating_mul(factor).min(self.max);
                let jitter = if self.jitter_ratio > 0.0 {
                    let r: f64 = self
                        .rng
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .gen_range(0.0..=self.jitter_ratio);
                    raw.mul_f64(r)
                } else {
                    Duration::ZERO
                };
                raw.saturating_add(jitter)
            }
        };
        delay.min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_is_constant() {
        let p = BackoffPolicy::fixed(Duration::from_secs(2));
        assert_eq!(p.delay(1), Duration::from_secs(2));
        assert_eq!(p.delay(5), Duration::from_secs(2));
    }

    #[test]
    fn exponential_without_jitter_doubles() {
        let p = BackoffPolicy::exponential(Duration::from_secs(5), Duration::from_secs(300), 0.0);
        assert_eq!(p.delay(1), Duration::from_secs(5));
        assert_eq!(p.delay(2), Duration::from_secs(10));
        assert_eq!(p.delay(3), Duration::from_secs(20));
    }

    #[test]
    fn exponential_capped() {
        let p = BackoffPolicy::exponential(Duration::from_secs(100), Duration::from_secs(300), 0.0);
        assert_eq!(p.delay(10), Duration::from_secs(300));
        assert_eq!(p.delay(40), Duration::from_secs(300));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let p = BackoffPolicy::exponential(Duration::from_secs(4), Duration::from_secs(3600), 0.5)
            .with_seed(7);
        for attempt in 1..=5 {
            let raw = Duration::from_secs(4) * 2u32.pow(attempt - 1);
            let d = p.delay(attempt);
            assert!(d >= raw, "attempt {attempt}: {d:?} < {raw:?}");
            assert!(d <= raw.mul_f64(1.5), "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn same_seed_same_delays() {
        let a = BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(60), 0.5)
            .with_seed(42);
        let b = BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(60), 0.5)
            .with_seed(42);
        let da: Vec<_> = (1..=4).map(|n| a.delay(n)).collect();
        let db: Vec<_> = (1..=4).map(|n| b.delay(n)).collect();
        assert_eq!(da, db);
    }

    #[test]
    fn from_config_defaults() {
        let p = BackoffPolicy::from_config(&RetryConfig::default()).with_seed(1);
        let d = p.delay(1);
        assert!(d >= Duration::from_secs(5) && d <= Duration::from_millis(7_500));
    }
}
