//! Redis-backed cache store.
//!
//! Requires the `redis` feature. Every command runs on a clone of one
//! multiplexed connection and is bounded by the configured store timeout.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use larder_core::{
    glob, CacheConfig, CacheKey, InvalidationPattern, StoreError, StoreResult, Ttl,
    SEGMENT_SEPARATOR,
};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};

use super::traits::{CacheStore, ScanCursor, ScanPage};

/// [`CacheStore`] over a Redis server.
///
/// When a key namespace is configured, every key is stored as
/// `namespace:key` and scan results have the namespace stripped again, so
/// callers never see it.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    namespace: Option<String>,
    timeout: Duration,
}

impl RedisStore {
    /// Connect using `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the URL is invalid or the
    /// server cannot be reached within the store timeout.
    pub async fn connect(config: &CacheConfig) -> StoreResult<Self> {
        let client = Client::open(config.redis_url.as_str()).map_err(|e| {
            StoreError::Unavailable {
                reason: format!("invalid Redis URL: {e}"),
            }
        })?;

        let conn = tokio::time::timeout(
            config.store_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| StoreError::Timeout {
            operation: "CONNECT",
            elapsed: config.store_timeout,
        })?
        .map_err(|e| StoreError::Unavailable {
            reason: e.to_string(),
        })?;

        tracing::info!(
            namespace = config.key_namespace.as_deref().unwrap_or(""),
            "connected to Redis cache store"
        );

        Ok(Self {
            conn,
            namespace: config.key_namespace.clone(),
            timeout: config.store_timeout,
        })
    }

    /// Connect using configuration read from the environment.
    pub async fn from_env() -> larder_core::LarderResult<Self> {
        let config = CacheConfig::from_env()?;
        Ok(Self::connect(&config).await?)
    }

    async fn run<T, Fut>(&self, operation: &'static str, fut: Fut) -> StoreResult<T>
    where
        Fut: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| map_redis_error(operation, self.timeout, e)),
            Err(_) => Err(StoreError::Timeout {
                operation,
                elapsed: self.timeout,
            }),
        }
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn namespaced_key(namespace: Option<&str>, key: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}{SEGMENT_SEPARATOR}{key}"),
        None => key.to_string(),
    }
}

fn namespaced_pattern(namespace: Option<&str>, pattern: &InvalidationPattern) -> String {
    match namespace {
        Some(ns) => format!("{}{SEGMENT_SEPARATOR}{}", glob::escape(ns), pattern.as_str()),
        None => pattern.as_str().to_string(),
    }
}

fn strip_namespace(namespace: Option<&str>, raw: String) -> Option<CacheKey> {
    let key = match namespace {
        Some(ns) => raw
            .strip_prefix(ns)
            .and_then(|rest| rest.strip_prefix(SEGMENT_SEPARATOR))
            .map(str::to_string)?,
        None => raw,
    };
    CacheKey::new(key).ok()
}

/// `elapsed` is reported for client-side timeouts, which only fire once the
/// operation's budget is spent.
fn map_redis_error(operation: &'static str, elapsed: Duration, e: RedisError) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout { operation, elapsed }
    } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        StoreError::Unavailable {
            reason: e.to_string(),
        }
    } else {
        StoreError::Command {
            operation,
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let key = namespaced_key(self.namespace.as_deref(), key.as_str());
        self.run("GET", async move {
            let value: Option<Vec<u8>> = conn.get(key).await?;
            Ok::<_, RedisError>(value)
        })
        .await
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Ttl>) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let key = namespaced_key(self.namespace.as_deref(), key.as_str());
        match ttl {
            Some(ttl) => {
                self.run("SETEX", async move {
                    let () = conn.set_ex(key, value, ttl.as_secs()).await?;
                    Ok::<_, RedisError>(())
                })
                .await
            }
            None => {
                self.run("SET", async move {
                    let () = conn.set(key, value).await?;
                    Ok::<_, RedisError>(())
                })
                .await
            }
        }
    }

    async fn scan(
        &self,
        cursor: ScanCursor,
        pattern: &InvalidationPattern,
        batch_size: usize,
    ) -> StoreResult<ScanPage> {
        let mut conn = self.conn.clone();
        let pattern = namespaced_pattern(self.namespace.as_deref(), pattern);
        let (next, raw_keys): (u64, Vec<String>) = self
            .run("SCAN", async move {
                redis::cmd("SCAN")
                    .arg(cursor.get())
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(batch_size.max(1))
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let keys = raw_keys
            .into_iter()
            .filter_map(|raw| strip_namespace(self.namespace.as_deref(), raw))
            .collect();
        Ok(ScanPage::new(ScanCursor::new(next), keys))
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let namespace = self.namespace.as_deref();
        let keys: Vec<String> = keys
            .iter()
            .map(|k| namespaced_key(namespace, k.as_str()))
            .collect();
        self.run("DEL", async move {
            let deleted: u64 = conn.del(keys).await?;
            Ok::<_, RedisError>(deleted)
        })
        .await
    }
}
