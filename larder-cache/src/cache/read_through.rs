//! Read-through cache coordinator.
//!
//! This module implements get-or-compute with schema validation on both
//! sides of the store, and invalidation by glob pattern through an
//! incremental scan followed by one bulk delete.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use larder_core::{CacheConfig, CacheKey, InvalidationPattern, KeyPrefix, StoreResult, Ttl};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::CacheError;
use super::read::{CacheRead, ReadSource};
use super::schema::{self, ValueSchema};
use super::traits::{CacheStore, ScanCursor};

/// Keys requested per SCAN call when no config is given.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 100;

/// Read-through cache over a [`CacheStore`].
///
/// The coordinator holds no mutable state of its own: clones share the
/// store and every call is independent.
///
/// # Concurrency
///
/// There is no single-flight. When several callers miss on the same key at
/// the same time, each runs its computation and each writes the result; the
/// last write wins. Callers whose computations are expensive or not
/// idempotent must coordinate outside the cache.
///
/// Dropping a `get_or_compute` future while the computation is pending
/// drops the computation too. The write happens only after the computation
/// finishes, so a cancelled call never writes.
///
/// # Example
///
/// ```ignore
/// let cache = ReadThroughCache::new(Arc::new(MemoryStore::new()));
/// let key = KeyPrefix::new("user").segment(user_id).key(["saved_recipes_count"]);
///
/// let count: i64 = cache
///     .get_or_compute(&key, Some(Ttl::from_secs(600)?), &non_negative, || async {
///         db.count_saved_recipes(user_id).await
///     })
///     .await?;
///
/// // after a write that changes the count
/// cache.invalidate_prefix(&KeyPrefix::new("user").segment(user_id)).await?;
/// ```
pub struct ReadThroughCache<S: ?Sized> {
    store: Arc<S>,
    scan_batch_size: usize,
}

impl<S> ReadThroughCache<S>
where
    S: CacheStore + ?Sized,
{
    /// Create a coordinator over `store` with the default scan batch size.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
        }
    }

    /// Create a coordinator over `store` using `config`.
    pub fn with_config(store: Arc<S>, config: &CacheConfig) -> Self {
        Self::new(store).with_scan_batch_size(config.scan_batch_size)
    }

    /// Set the number of keys requested per SCAN call. Zero is treated as one.
    #[must_use]
    pub fn with_scan_batch_size(mut self, batch_size: usize) -> Self {
        self.scan_batch_size = batch_size.max(1);
        self
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Keys requested per SCAN call.
    pub fn scan_batch_size(&self) -> usize {
        self.scan_batch_size
    }

    /// Return the cached value for `key`, or compute, validate and cache it.
    ///
    /// A stored value that fails to decode or fails `schema` is treated as
    /// absent and overwritten. A computed value that fails `schema` is an
    /// error and is not written.
    ///
    /// One GET, at most one computation and at most one SET per call.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Store`] if GET or SET fails
    /// - [`CacheError::Compute`] with the computation's own error
    /// - [`CacheError::InvalidComputedValue`] if `schema` rejects the computed value
    /// - [`CacheError::Encode`] if the value cannot be serialized
    pub async fn get_or_compute<T, V, F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Option<Ttl>,
        schema: &V,
        compute: F,
    ) -> Result<T, CacheError<E>>
    where
        T: Serialize + DeserializeOwned,
        V: ValueSchema<T> + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_compute_traced(key, ttl, schema, compute)
            .await
            .map(CacheRead::into_value)
    }

    /// Same as [`Self::get_or_compute`], also reporting whether the value
    /// was a hit, a miss or a refresh of an invalid entry.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %key, ttl = ?ttl))]
    pub async fn get_or_compute_traced<T, V, F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Option<Ttl>,
        schema: &V,
        compute: F,
    ) -> Result<CacheRead<T>, CacheError<E>>
    where
        T: Serialize + DeserializeOwned,
        V: ValueSchema<T> + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut source = ReadSource::Miss;

        if let Some(bytes) = self.store.get(key).await? {
            match schema::decode_with(&bytes, schema) {
                Ok(value) => {
                    debug!("cache hit");
                    return Ok(CacheRead::hit(value));
                }
                Err(e) => {
                    warn!(error = %e, "cached value failed validation, recomputing");
                    source = ReadSource::Refreshed;
                }
            }
        } else {
            debug!("cache miss");
        }

        let value = compute().await.map_err(|e| {
            debug!("computation failed, nothing cached");
            CacheError::Compute(e)
        })?;

        let value = schema.validate(value).map_err(|e| {
            warn!(error = %e, "computed value failed validation");
            CacheError::InvalidComputedValue {
                key: key.clone(),
                source: e,
            }
        })?;

        let bytes = schema::encode(&value).map_err(|e| CacheError::Encode {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        self.store.set(key, bytes, ttl).await?;
        debug!(?source, "cached computed value");

        Ok(CacheRead::computed(value, source))
    }

    /// Delete every key matching `pattern`.
    ///
    /// Walks the key space with SCAN until the cursor comes back to the
    /// start, then deletes everything found in a single call. Nothing is
    /// deleted if nothing matched. Keys written after the scan passed their
    /// position may survive.
    ///
    /// Returns the number of keys the store reports deleted.
    ///
    /// # Errors
    ///
    /// Returns the first store error. Keys collected before it are not
    /// deleted.
    #[tracing::instrument(level = "debug", skip_all, fields(pattern = %pattern))]
    pub async fn invalidate(&self, pattern: &InvalidationPattern) -> StoreResult<u64> {
        let keys = self.matching_keys(pattern).await?;
        if keys.is_empty() {
            debug!("no keys matched");
            return Ok(0);
        }

        let deleted = self.store.delete_many(&keys).await?;
        info!(matched = keys.len(), deleted, "invalidated cache keys");
        Ok(deleted)
    }

    /// Delete every key built from `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &KeyPrefix) -> StoreResult<u64> {
        self.invalidate(&prefix.pattern()).await
    }

    /// Delete a single key without scanning.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %key))]
    pub async fn invalidate_key(&self, key: &CacheKey) -> StoreResult<bool> {
        let deleted = self.store.delete_many(std::slice::from_ref(key)).await?;
        Ok(deleted > 0)
    }

    /// Collect every key matching `pattern`, without duplicates.
    pub async fn matching_keys(&self, pattern: &InvalidationPattern) -> StoreResult<Vec<CacheKey>> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor = ScanCursor::START;
        let mut rounds = 0usize;

        loop {
            let page = self
                .store
                .scan(cursor, pattern, self.scan_batch_size)
                .await?;
            rounds += 1;

            for key in page.keys {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }

            if page.cursor.is_start() {
                break;
            }
            cursor = page.cursor;
        }

        debug!(rounds, found = keys.len(), "scan complete");
        Ok(keys)
    }
}

impl<S: ?Sized> Clone for ReadThroughCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            scan_batch_size: self.scan_batch_size,
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for ReadThroughCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("scan_batch_size", &self.scan_batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryStore;
    use crate::cache::schema::ShapeOnly;
    use crate::cache::traits::ScanPage;
    use async_trait::async_trait;
    use larder_core::{StoreError, ValidationError};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // Store that replays scripted scan pages and records deletes.
    #[derive(Default)]
    struct ScriptedStore {
        pages: Mutex<Vec<ScanPage>>,
        scans: AtomicUsize,
        deleted: Mutex<Vec<Vec<CacheKey>>>,
    }

    impl ScriptedStore {
        fn with_pages(pages: Vec<ScanPage>) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().rev().collect()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl CacheStore for ScriptedStore {
        async fn get(&self, _key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn set(&self, _key: &CacheKey, _value: Vec<u8>, _ttl: Option<Ttl>) -> StoreResult<()> {
            Ok(())
        }

        async fn scan(
            &self,
            _cursor: ScanCursor,
            _pattern: &InvalidationPattern,
            _batch_size: usize,
        ) -> StoreResult<ScanPage> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            Ok(self.pages.lock().unwrap().pop().unwrap_or_default())
        }

        async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<u64> {
            self.deleted.lock().unwrap().push(keys.to_vec());
            Ok(keys.len() as u64)
        }
    }

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s).unwrap()
    }

    fn non_negative(n: i64) -> Result<i64, ValidationError> {
        if n < 0 {
            return Err(ValidationError::invalid("count", "must be non-negative"));
        }
        Ok(n)
    }

    #[tokio::test]
    async fn test_miss_computes_and_writes() {
        let store = Arc::new(MemoryStore::new());
        let cache = ReadThroughCache::new(store.clone());

        let read = cache
            .get_or_compute_traced(&key("count"), None, &non_negative, || async {
                Ok::<_, Infallible>(7)
            })
            .await
            .unwrap();

        assert_eq!(read.source(), ReadSource::Miss);
        assert_eq!(read.into_value(), 7);
        assert_eq!(store.get(&key("count")).await.unwrap(), Some(b"7".to_vec()));
    }

    #[tokio::test]
    async fn test_hit_skips_compute() {
        let cache = ReadThroughCache::new(Arc::new(MemoryStore::new()));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: i64 = cache
                .get_or_compute(&key("count"), None, &non_negative, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(5)
                })
                .await
                .unwrap();
            assert_eq!(value, 5);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_cached_value_is_refreshed() {
        let store = Arc::new(MemoryStore::new());
        store.set(&key("count"), b"-3".to_vec(), None).await.unwrap();
        let cache = ReadThroughCache::new(store.clone());

        let read = cache
            .get_or_compute_traced(&key("count"), None, &non_negative, || async {
                Ok::<_, Infallible>(4)
            })
            .await
            .unwrap();

        assert_eq!(read.source(), ReadSource::Refreshed);
        assert_eq!(*read.value(), 4);
        assert_eq!(store.get(&key("count")).await.unwrap(), Some(b"4".to_vec()));
    }

    #[tokio::test]
    async fn test_invalid_computed_value_is_error() {
        let store = Arc::new(MemoryStore::new());
        let cache = ReadThroughCache::new(store.clone());

        let err = cache
            .get_or_compute(&key("count"), None, &non_negative, || async {
                Ok::<_, Infallible>(-1)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::InvalidComputedValue { .. }));
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_compute_error_passes_through() {
        let store = Arc::new(MemoryStore::new());
        let cache = ReadThroughCache::new(store.clone());

        let err = cache
            .get_or_compute(&key("count"), None, &ShapeOnly, || async {
                Err::<i64, _>("db down")
            })
            .await
            .unwrap_err();

        assert_eq!(err.into_compute_error().unwrap(), "db down");
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_accumulates_and_dedupes_across_pages() {
        let store = Arc::new(ScriptedStore::with_pages(vec![
            ScanPage::new(ScanCursor::new(4), vec![key("a"), key("b")]),
            ScanPage::new(ScanCursor::new(9), vec![]),
            ScanPage::new(ScanCursor::START, vec![key("b"), key("c")]),
        ]));
        let cache = ReadThroughCache::new(store.clone());

        let deleted = cache
            .invalidate(&InvalidationPattern::new("*").unwrap())
            .await
            .unwrap();

        assert_eq!(deleted, 3);
        assert_eq!(store.scans.load(Ordering::SeqCst), 3);
        let calls = store.deleted.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec![key("a"), key("b"), key("c")]);
    }

    #[tokio::test]
    async fn test_invalidate_without_matches_skips_delete() {
        let store = Arc::new(ScriptedStore::with_pages(vec![
            ScanPage::new(ScanCursor::new(1), vec![]),
            ScanPage::new(ScanCursor::START, vec![]),
        ]));
        let cache = ReadThroughCache::new(store.clone());

        let deleted = cache
            .invalidate(&InvalidationPattern::new("nothing_*").unwrap())
            .await
            .unwrap();

        assert_eq!(deleted, 0);
        assert!(store.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_key_and_prefix() {
        let store = Arc::new(MemoryStore::new());
        let cache = ReadThroughCache::new(store.clone());
        let user = KeyPrefix::new("user").segment(42);

        for k in [user.key(["a"]), user.key(["b"]), key("user:420:a")] {
            store.set(&k, b"1".to_vec(), None).await.unwrap();
        }

        assert!(cache.invalidate_key(&user.key(["a"])).await.unwrap());
        assert!(!cache.invalidate_key(&user.key(["a"])).await.unwrap());
        assert_eq!(cache.invalidate_prefix(&user).await.unwrap(), 1);
        assert_eq!(store.keys().unwrap(), vec!["user:420:a"]);
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        struct DownStore;

        #[async_trait]
        impl CacheStore for DownStore {
            async fn get(&self, _key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
                Err(StoreError::Unavailable {
                    reason: "connection refused".to_string(),
                })
            }

            async fn set(&self, _: &CacheKey, _: Vec<u8>, _: Option<Ttl>) -> StoreResult<()> {
                Ok(())
            }

            async fn scan(
                &self,
                _: ScanCursor,
                _: &InvalidationPattern,
                _: usize,
            ) -> StoreResult<ScanPage> {
                Err(StoreError::Timeout {
                    operation: "SCAN",
                    elapsed: std::time::Duration::from_secs(2),
                })
            }

            async fn delete_many(&self, _: &[CacheKey]) -> StoreResult<u64> {
                Ok(0)
            }
        }

        let cache = ReadThroughCache::new(Arc::new(DownStore));
        let calls = AtomicUsize::new(0);

        let err = cache
            .get_or_compute(&key("count"), None, &ShapeOnly, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<i64, Infallible>(1)
            })
            .await
            .unwrap_err();
        assert!(err.is_store());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let err = cache
            .invalidate(&InvalidationPattern::new("*").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
    }

    #[test]
    fn test_config_and_batch_size() {
        let store = Arc::new(MemoryStore::new());
        let config = CacheConfig::new().with_scan_batch_size(25);
        assert_eq!(ReadThroughCache::with_config(store.clone(), &config).scan_batch_size(), 25);
        assert_eq!(
            ReadThroughCache::new(store).with_scan_batch_size(0).scan_batch_size(),
            1
        );
    }
}
