//! Exponential reconnect backoff with jitter.
//!
//! Delay for attempt `n` (0-based) is `min(cap, base * 2^n)`, reduced by up to
//! `jitter` of itself using caller-supplied entropy. Delays handed out by one
//! [`Backoff`] never decrease until [`Backoff::reset`], so a flapping server
//! cannot pull the retry rate back up through an unlucky jitter draw.
//!
//! A server `retry_after` hint raises the floor through
//! [`Backoff::defer_at_least`]; the hint may exceed the cap.

use std::time::Duration;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default upper bound on the reconnect delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Default jitter fraction.
pub const DEFAULT_BACKOFF_JITTER: f64 = 0.2;

/// Backoff configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base: Duration,
    /// Maximum delay between retries
    pub cap: Duration,
    /// Fraction of each delay that may be shaved off at random (0.0..=1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base: DEFAULT_BACKOFF_BASE, cap: DEFAULT_BACKOFF_CAP, jitter: DEFAULT_BACKOFF_JITTER }
    }
}

/// Backoff state for one reconnect loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    last_delay: Duration,
}

impl Backoff {
    /// Create a fresh backoff.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0, last_delay: Duration::ZERO }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt.
    ///
    /// `entropy` is any uniformly distributed `u64` (see
    /// [`crate::env::Environment::random_u64`]).
    pub fn next_delay(&mut self, entropy: u64) -> Duration {
        let cap = self.config.cap.max(self.config.base);
        let exponent = self.attempt.min(31);
        let raw = self.config.base.saturating_mul(1u32 << exponent).min(cap);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let fraction = unit_interval(entropy) * jitter;
        let jittered = raw.saturating_sub(raw.mul_f64(fraction));

        let delay = jittered.min(cap).max(self.last_delay);

        self.attempt = self.attempt.saturating_add(1);
        self.last_delay = delay;
        delay
    }

    /// Make every further delay at least `floor` until the next reset.
    pub fn defer_at_least(&mut self, floor: Duration) {
        self.last_delay = self.last_delay.max(floor);
    }

    /// Start over from the base delay (after a successful connect).
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_delay = Duration::ZERO;
    }
}

/// Map a `u64` to `[0, 1)` using its top 53 bits.
fn unit_interval(entropy: u64) -> f64 {
    (entropy >> 11) as f64 / (1u64 << 53) as f64
}
