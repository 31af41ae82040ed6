//! Client configuration.
//!
//! Defaults match the development authority (`ws://127.0.0.1:8000`,
//! REST API under `http://localhost:8000/api`). Both base URLs can be
//! overridden from the environment with [`ClientConfig::from_env`].

use std::time::Duration;

/// Environment variable overriding the WebSocket base URL.
pub const WS_URL_ENV: &str = "SCRIBE_WS_URL";
/// Environment variable overriding the REST API base URL.
pub const API_URL_ENV: &str = "SCRIBE_API_URL";

const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000";
const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Exponential backoff for reconnection after abnormal closure.
///
/// `delay(attempt) = min(initial_delay · factor^(attempt−1), max_delay)`
/// for `1 <= attempt <= max_attempts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            factor: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    ///
    /// Returns `None` once the attempt cap is exceeded.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let multiplier = self.factor.saturating_pow(attempt - 1);
        Some(self.initial_delay.saturating_mul(multiplier).min(self.max_delay))
    }
}

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket base URL, e.g. `ws://127.0.0.1:8000`
    pub base_url: String,
    /// Debounce before the first connection attempt
    pub connect_delay: Duration,
    /// Reconnect schedule after abnormal closure
    pub backoff: BackoffPolicy,
    /// Lifecycle event channel capacity
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WS_URL.to_string(),
            connect_delay: Duration::from_millis(500),
            backoff: BackoffPolicy::default(),
            event_capacity: 64,
        }
    }
}

impl ConnectionConfig {
    /// Short delays for tests.
    pub fn for_testing(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_delay: Duration::from_millis(10),
            backoff: BackoffPolicy {
                initial_delay: Duration::from_millis(20),
                factor: 2,
                max_delay: Duration::from_millis(200),
                max_attempts: 3,
            },
            event_capacity: 64,
        }
    }
}

/// Full client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    /// REST API base URL, e.g. `http://localhost:8000/api`
    pub api_base_url: String,
    /// How long a guest waits for INITIALIZE before giving up
    pub guest_init_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            api_base_url: DEFAULT_API_URL.to_string(),
            guest_init_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Defaults, with base URLs taken from the environment when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup(WS_URL_ENV).filter(|u| !u.is_empty()) {
            config.connection.base_url = url;
        }
        if let Some(url) = lookup(API_URL_ENV).filter(|u| !u.is_empty()) {
            config.api_base_url = url;
        }
        config
    }

    /// Short delays for tests.
    pub fn for_testing(ws_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::for_testing(ws_url),
            api_base_url: api_url.into(),
            guest_init_timeout: Duration::from_millis(500),
        }
    }
}
