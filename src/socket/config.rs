//! Connection pool configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding the maximum number of idle connections.
pub const POOL_SIZE_ENV: &str = "KEEPALIVE_POOL_SIZE";
/// Environment variable holding the default keep-alive, in seconds.
pub const KEEP_ALIVE_ENV: &str = "KEEPALIVE_TIMEOUT_SECS";

/// Idle connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum idle connections across all keys (0 = unbounded)
    pub max_pool_size: usize,
    /// Keep-alive used when the caller does not supply one (whole seconds)
    #[serde(with = "duration_secs")]
    pub keep_alive: Duration,
    /// How long an idle reaper waits when nothing is scheduled to expire
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 0,
            keep_alive: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from environment variables.
    ///
    /// Reads `KEEPALIVE_POOL_SIZE` and `KEEPALIVE_TIMEOUT_SECS`; missing or
    /// unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(size) = lookup(POOL_SIZE_ENV).and_then(|v| v.trim().parse().ok()) {
            config.max_pool_size = size;
        }
        if let Some(secs) = lookup(KEEP_ALIVE_ENV).and_then(|v| v.trim().parse().ok()) {
            config.keep_alive = Duration::from_secs(secs);
        }
        config
    }

    /// Set the maximum number of idle connections (0 = unbounded).
    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the default keep-alive.
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the idle reaper's fallback interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.max_pool_size > 0
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
