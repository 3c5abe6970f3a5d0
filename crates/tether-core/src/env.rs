//! Clock, timer and entropy seam.
//!
//! The lifecycle never reads the wall clock or the OS RNG. Drivers pass an
//! [`Environment`] in, so reconnect timing and backoff jitter replay exactly
//! under a virtual clock and a seeded RNG.

use std::time::Duration;

/// Source of time, sleeping and randomness for the session.
///
/// Contract:
///
/// - `now()` is monotonic
/// - no method fails in normal operation; a missing OS entropy source or a
///   misconfigured simulation may panic
pub trait Environment: Clone + Send + Sync + 'static {
    /// Point-in-time type.
    ///
    /// `std::time::Instant` in production; a virtual instant under
    /// simulation.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>
        + std::ops::Add<Duration, Output = Self::Instant>;

    /// Current instant. Never earlier than a previous call.
    fn now(&self) -> Self::Instant;

    /// Resolve after `duration`.
    ///
    /// Awaited by the session driver only; the lifecycle reports deadlines
    /// and reconnect delays as data instead.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes. Deterministic for a given seed under
    /// simulation.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64` for backoff jitter.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
