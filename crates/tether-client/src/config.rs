//! Session configuration.

use std::time::Duration;

use tether_core::{
    BackoffConfig, LifecycleConfig,
    lifecycle::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_IDLE_TIMEOUT},
};

/// Default realtime endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8080/realtime";

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Realtime endpoint URL
    pub endpoint: String,
    /// Timeout for completing the handshake (including transport open)
    pub handshake_timeout: Duration,
    /// Inbound silence tolerated before reconnecting
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be < idle_timeout / 2)
    pub heartbeat_interval: Duration,
    /// Reconnect backoff policy
    pub backoff: BackoffConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            backoff: BackoffConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Default configuration for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), ..Self::default() }
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the reconnect backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Lifecycle view of this configuration.
    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            handshake_timeout: self.handshake_timeout,
            idle_timeout: self.idle_timeout,
            heartbeat_interval: self.heartbeat_interval,
            backoff: self.backoff,
        }
    }
}
