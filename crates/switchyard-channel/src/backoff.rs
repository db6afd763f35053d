use rand::Rng;
use std::time::Duration;
use switchyard_core::AgentSettings;

/// Exponential backoff with additive jitter.
///
/// The delay before retry `n` (1-indexed) is
/// `min(base * 2^(n-1) + jitter, max)` with `jitter` uniform in `[0, base)`.
/// Because `jitter < base`, the uncapped term of retry `n` is always below
/// that of retry `n + 1`, so successive delays never decrease and never
/// exceed `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Disable to get the deterministic lower bound of every delay.
    pub jitter: bool,
}

impl Backoff {
    /// Full-jitter backoff between `base` and `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: true,
        }
    }

    /// Use the exact exponential delay, no jitter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry `retry` (1-indexed).
    pub fn delay(&self, retry: u32) -> Duration {
        let jitter = if self.jitter {
            random_jitter(self.base)
        } else {
            Duration::ZERO
        };
        compute_backoff(self.base, self.max, retry, jitter)
    }
}

impl From<&AgentSettings> for Backoff {
    fn from(settings: &AgentSettings) -> Self {
        Backoff::new(settings.base_delay(), settings.max_delay())
    }
}

/// Deterministic core of [`Backoff::delay`].
pub fn compute_backoff(base: Duration, max: Duration, retry: u32, jitter: Duration) -> Duration {
    let exponent = retry.saturating_sub(1).min(31);
    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(exp_ms)
        .saturating_add(jitter)
        .min(max)
}

fn random_jitter(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..base_ms))
}
