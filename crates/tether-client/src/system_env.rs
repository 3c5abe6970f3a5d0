//! System clock, tokio timers and OS entropy for production sessions.
//!
//! Reconnect timing under `SystemEnv` is not reproducible; tests drive
//! sessions with the harness `SimEnv`.

use std::time::Duration;

use tether_core::Environment;

/// Production environment using system time and OS randomness.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. Randomness only feeds backoff
/// jitter here, but an OS without an entropy source is not one the session
/// can sensibly keep running on.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Environment backed by the running tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG available");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::disallowed_methods)]
    fn time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(env.now() > t1);
    }

    #[test]
    fn random_u64_varies() {
        let env = SystemEnv::new();
        let draws: Vec<u64> = (0..4).map(|_| env.random_u64()).collect();
        assert!(draws.windows(2).any(|w| w[0] != w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_waits() {
        let env = SystemEnv::new();

        let start = tokio::time::Instant::now();
        env.sleep(Duration::from_millis(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
