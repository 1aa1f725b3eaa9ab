//! Cache configuration.
//!
//! Values are read from environment variables with defaults suitable for
//! local development.

use std::time::Duration;

use crate::ConfigError;

/// Environment variable holding the SCAN batch size.
pub const ENV_SCAN_BATCH_SIZE: &str = "LARDER_SCAN_BATCH_SIZE";
/// Environment variable holding the Redis connection URL.
pub const ENV_REDIS_URL: &str = "LARDER_REDIS_URL";
/// Environment variable holding the key namespace.
pub const ENV_KEY_NAMESPACE: &str = "LARDER_KEY_NAMESPACE";
/// Environment variable holding the per-operation store timeout in milliseconds.
pub const ENV_STORE_TIMEOUT_MS: &str = "LARDER_STORE_TIMEOUT_MS";

/// Configuration for the cache layer and its store adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Number of keys requested per SCAN round-trip during invalidation.
    pub scan_batch_size: usize,

    /// Connection URL for the Redis store.
    pub redis_url: String,

    /// Optional namespace prepended to every key by remote stores.
    /// Lets several deployments share one Redis database.
    pub key_namespace: Option<String>,

    /// Upper bound on a single store round-trip.
    pub store_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            scan_batch_size: 100,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_namespace: None,
            store_timeout: Duration::from_millis(2000),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SCAN batch size.
    #[must_use]
    pub fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size;
        self
    }

    /// Set the Redis URL.
    #[must_use]
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Set the key namespace.
    #[must_use]
    pub fn with_key_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.key_namespace = Some(namespace.into());
        self
    }

    /// Set the store timeout.
    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Load the config from environment variables.
    ///
    /// Environment variables:
    /// - `LARDER_SCAN_BATCH_SIZE`: keys per SCAN call (default: 100)
    /// - `LARDER_REDIS_URL`: Redis URL (default: `redis://127.0.0.1:6379`)
    /// - `LARDER_KEY_NAMESPACE`: key namespace (default: none)
    /// - `LARDER_STORE_TIMEOUT_MS`: store round-trip timeout (default: 2000)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting config fails [`CacheConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load the config through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let scan_batch_size = match lookup(ENV_SCAN_BATCH_SIZE) {
            Some(raw) => parse_number(ENV_SCAN_BATCH_SIZE, &raw)?,
            None => defaults.scan_batch_size,
        };

        let redis_url = lookup(ENV_REDIS_URL)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.redis_url);

        let key_namespace = lookup(ENV_KEY_NAMESPACE)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let store_timeout = match lookup(ENV_STORE_TIMEOUT_MS) {
            Some(raw) => Duration::from_millis(parse_number(ENV_STORE_TIMEOUT_MS, &raw)?),
            None => defaults.store_timeout,
        };

        let config = Self {
            scan_batch_size,
            redis_url,
            key_namespace,
            store_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the config for values no store can work with.
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: ENV_SCAN_BATCH_SIZE.to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: ENV_STORE_TIMEOUT_MS.to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.redis_url.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: ENV_REDIS_URL.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
