//! Larder Test Utilities
//!
//! Shared test infrastructure for the Larder workspace:
//! - Store wrappers that record calls or inject faults
//! - Proptest generators for keys, prefixes and TTLs
//! - Fixtures modelling the recipe-site read paths the cache serves
//! - Assertions on cache outcomes
//! - Tracing setup for tests

pub use larder_cache::{
    CacheError, CacheRead, CacheStore, ManualClock, MemoryStore, ReadSource, ReadThroughCache,
    ScanCursor, ScanPage, ShapeOnly, ValueSchema,
};
pub use larder_core::{
    CacheConfig, CacheKey, InvalidationPattern, KeyPrefix, StoreError, StoreResult, Ttl,
    ValidationError,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, Once, PoisonError};

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call has an effect.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// RECORDING STORE
// ============================================================================

/// One call observed by a [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Get {
        key: String,
    },
    Set {
        key: String,
        ttl: Option<Ttl>,
    },
    Scan {
        cursor: u64,
        pattern: String,
        batch_size: usize,
    },
    DeleteMany {
        keys: Vec<String>,
    },
}

/// Wraps a store and records every call made through it.
#[derive(Debug, Default)]
pub struct RecordingStore<S = MemoryStore> {
    inner: S,
    calls: Mutex<Vec<StoreCall>>,
}

impl<S: CacheStore> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Forget recorded calls.
    pub fn reset(&self) {
        lock(&self.calls).clear();
    }

    pub fn get_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Get { .. }))
    }

    pub fn set_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Set { .. }))
    }

    pub fn scan_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Scan { .. }))
    }

    pub fn delete_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::DeleteMany { .. }))
    }

    /// Key lists passed to `delete_many`, one entry per call.
    pub fn deleted_batches(&self) -> Vec<Vec<String>> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                StoreCall::DeleteMany { keys } => Some(keys.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&StoreCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: StoreCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl<S: CacheStore> CacheStore for RecordingStore<S> {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        self.record(StoreCall::Get {
            key: key.to_string(),
        });
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Ttl>) -> StoreResult<()> {
        self.record(StoreCall::Set {
            key: key.to_string(),
            ttl,
        });
        self.inner.set(key, value, ttl).await
    }

    async fn scan(
        &self,
        cursor: ScanCursor,
        pattern: &InvalidationPattern,
        batch_size: usize,
    ) -> StoreResult<ScanPage> {
        self.record(StoreCall::Scan {
            cursor: cursor.get(),
            pattern: pattern.to_string(),
            batch_size,
        });
        self.inner.scan(cursor, pattern, batch_size).await
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<u64> {
        self.record(StoreCall::DeleteMany {
            keys: keys.iter().map(ToString::to_string).collect(),
        });
        self.inner.delete_many(keys).await
    }
}

// ============================================================================
// FAULTY STORE
// ============================================================================

/// Store operation selector for [`FaultyStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Set,
    Scan,
    Delete,
}

/// Wraps a store and makes selected operations fail.
///
/// It can also repeat every key of every scan page, which real stores are
/// allowed to do.
#[derive(Debug)]
pub struct FaultyStore<S = MemoryStore> {
    inner: S,
    fail_get: AtomicBool,
    fail_set: AtomicBool,
    fail_scan: AtomicBool,
    fail_delete: AtomicBool,
    /// Scans succeed this many times before failing. `usize::MAX` = never.
    scans_before_failure: AtomicUsize,
    duplicate_scan_keys: AtomicBool,
}

impl<S: CacheStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_get: AtomicBool::new(false),
            fail_set: AtomicBool::new(false),
            fail_scan: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            scans_before_failure: AtomicUsize::new(usize::MAX),
            duplicate_scan_keys: AtomicBool::new(false),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Make `op` fail until [`Self::heal`] is called.
    pub fn fail(&self, op: StoreOp) {
        self.flag(op).store(true, Ordering::SeqCst);
    }

    /// Stop failing `op`.
    pub fn heal(&self, op: StoreOp) {
        self.flag(op).store(false, Ordering::SeqCst);
        if op == StoreOp::Scan {
            self.scans_before_failure.store(usize::MAX, Ordering::SeqCst);
        }
    }

    /// Let `pages` scan calls succeed, then fail every following one.
    pub fn fail_scan_after(&self, pages: usize) {
        self.scans_before_failure.store(pages, Ordering::SeqCst);
    }

    /// Return every scanned key twice.
    pub fn duplicate_scan_keys(&self, enabled: bool) {
        self.duplicate_scan_keys.store(enabled, Ordering::SeqCst);
    }

    fn flag(&self, op: StoreOp) -> &AtomicBool {
        match op {
            StoreOp::Get => &self.fail_get,
            StoreOp::Set => &self.fail_set,
            StoreOp::Scan => &self.fail_scan,
            StoreOp::Delete => &self.fail_delete,
        }
    }

    fn check(&self, op: StoreOp) -> StoreResult<()> {
        if self.flag(op).load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(())
    }

    fn check_scan_budget(&self) -> StoreResult<()> {
        let remaining = self
            .scans_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                usize::MAX => Some(usize::MAX),
                0 => None,
                n => Some(n - 1),
            });
        match remaining {
            Ok(_) => Ok(()),
            Err(_) => Err(injected()),
        }
    }
}

fn injected() -> StoreError {
    StoreError::Unavailable {
        reason: "injected fault".to_string(),
    }
}

#[async_trait]
impl<S: CacheStore> CacheStore for FaultyStore<S> {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        self.check(StoreOp::Get)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Ttl>) -> StoreResult<()> {
        self.check(StoreOp::Set)?;
        self.inner.set(key, value, ttl).await
    }

    async fn scan(
        &self,
        cursor: ScanCursor,
        pattern: &InvalidationPattern,
        batch_size: usize,
    ) -> StoreResult<ScanPage> {
        self.check(StoreOp::Scan)?;
        self.check_scan_budget()?;
        let mut page = self.inner.scan(cursor, pattern, batch_size).await?;
        if self.duplicate_scan_keys.load(Ordering::SeqCst) {
            let repeated = page.keys.clone();
            page.keys.extend(repeated);
        }
        Ok(page)
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<u64> {
        self.check(StoreOp::Delete)?;
        self.inner.delete_many(keys).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys and related types.

    use super::*;
    use proptest::prelude::*;

    /// A key segment as produced by typical call sites: identifiers,
    /// numbers and `name=value` filters.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z_]{1,12}",
            (0u64..100_000).prop_map(|n| n.to_string()),
            "[a-z]{1,6}=[a-z0-9]{1,6}",
        ]
    }

    /// A segment that may contain glob metacharacters.
    pub fn arb_hostile_segment() -> impl Strategy<Value = String> {
        "[a-z0-9*?\\[\\]\\\\^-]{1,10}"
    }

    /// A prefix with one to three segments.
    pub fn arb_key_prefix() -> impl Strategy<Value = KeyPrefix> {
        ("[a-z]{1,8}", proptest::collection::vec(arb_segment(), 0..3)).prop_map(
            |(namespace, segments)| {
                segments
                    .into_iter()
                    .fold(KeyPrefix::new(namespace), KeyPrefix::segment)
            },
        )
    }

    /// A key built under a generated prefix.
    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        (arb_key_prefix(), proptest::collection::vec(arb_segment(), 1..3))
            .prop_map(|(prefix, rest)| prefix.key(rest))
    }

    /// A valid TTL between one second and one day.
    pub fn arb_ttl() -> impl Strategy<Value = Ttl> {
        (1u64..=86_400).prop_filter_map("ttl in range", |secs| Ttl::from_secs(secs).ok())
    }

    /// An optional TTL.
    pub fn arb_optional_ttl() -> impl Strategy<Value = Option<Ttl>> {
        proptest::option::of(arb_ttl())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Fixtures modelling the read paths of a recipe site.

    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// TTL used for per-user counters.
    pub const SAVED_COUNT_TTL_SECS: u64 = 600;

    /// A recipe in a user's saved list.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SavedRecipe {
        pub id: u64,
        pub title: String,
        pub servings: u32,
    }

    impl SavedRecipe {
        pub fn new(id: u64, title: impl Into<String>, servings: u32) -> Self {
            Self {
                id,
                title: title.into(),
                servings,
            }
        }
    }

    /// The shape a previous deploy cached saved lists in.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LegacySavedRecipe {
        pub recipe_id: u64,
        pub name: String,
    }

    /// Counts must be non-negative.
    pub fn non_negative_count(count: i64) -> Result<i64, ValidationError> {
        if count < 0 {
            return Err(ValidationError::invalid(
                "count",
                format!("must be non-negative, got {count}"),
            ));
        }
        Ok(count)
    }

    /// Titles are trimmed and must not be empty; servings must be 1..=100.
    pub fn saved_recipe_schema(recipe: SavedRecipe) -> Result<SavedRecipe, ValidationError> {
        let title = recipe.title.trim().to_string();
        if title.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "title".to_string(),
            });
        }
        if !(1..=100).contains(&recipe.servings) {
            return Err(ValidationError::constraint(
                "servings",
                format!("{} is outside 1..=100", recipe.servings),
            ));
        }
        Ok(SavedRecipe { title, ..recipe })
    }

    /// Validates every recipe of a saved list.
    pub fn saved_list_schema(list: Vec<SavedRecipe>) -> Result<Vec<SavedRecipe>, ValidationError> {
        list.into_iter().map(saved_recipe_schema).collect()
    }

    /// Prefix under which everything about `user_id` is cached.
    pub fn user_prefix(user_id: u64) -> KeyPrefix {
        KeyPrefix::new("user").segment(user_id)
    }

    /// Key of a user's saved-recipe counter.
    pub fn saved_count_key(user_id: u64) -> CacheKey {
        user_prefix(user_id).key(["saved_recipes_count"])
    }

    /// Key of one page of a user's saved list.
    pub fn saved_page_key(user_id: u64, page: u32) -> CacheKey {
        user_prefix(user_id).key(["saved_recipes", "page", &page.to_string()])
    }

    /// TTL for per-user counters.
    pub fn saved_count_ttl() -> Option<Ttl> {
        Ttl::from_secs(SAVED_COUNT_TTL_SECS).ok()
    }

    /// Error raised by [`RecipeDb`].
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum DbError {
        #[error("database unavailable")]
        Unavailable,
    }

    /// In-memory stand-in for the relational store, counting its queries.
    #[derive(Debug, Default)]
    pub struct RecipeDb {
        saved: Mutex<HashMap<u64, Vec<SavedRecipe>>>,
        queries: AtomicUsize,
        down: AtomicBool,
        latency: Mutex<Option<Duration>>,
    }

    impl RecipeDb {
        pub fn new() -> Self {
            Self::default()
        }

        /// Record that `user_id` saved `recipe`.
        pub fn save(&self, user_id: u64, recipe: SavedRecipe) {
            lock(&self.saved).entry(user_id).or_default().push(recipe);
        }

        /// Record that `user_id` unsaved `recipe_id`.
        pub fn unsave(&self, user_id: u64, recipe_id: u64) {
            if let Some(list) = lock(&self.saved).get_mut(&user_id) {
                list.retain(|r| r.id != recipe_id);
            }
        }

        /// Make every query fail.
        pub fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        /// Delay every query by `latency`.
        pub fn set_latency(&self, latency: Duration) {
            *lock(&self.latency) = Some(latency);
        }

        /// Number of queries served.
        pub fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }

        async fn begin_query(&self) -> Result<(), DbError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let latency = *lock(&self.latency);
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(DbError::Unavailable);
            }
            Ok(())
        }

        /// `SELECT COUNT(*)` of a user's saved recipes.
        pub async fn count_saved(&self, user_id: u64) -> Result<i64, DbError> {
            self.begin_query().await?;
            let count = lock(&self.saved).get(&user_id).map_or(0, Vec::len);
            Ok(i64::try_from(count).unwrap_or(i64::MAX))
        }

        /// One page of a user's saved recipes.
        pub async fn saved_page(
            &self,
            user_id: u64,
            page: u32,
            per_page: usize,
        ) -> Result<Vec<SavedRecipe>, DbError> {
            self.begin_query().await?;
            let skip = (page as usize).saturating_mul(per_page);
            Ok(lock(&self.saved)
                .get(&user_id)
                .map(|list| list.iter().skip(skip).take(per_page).cloned().collect())
                .unwrap_or_default())
        }
    }

    /// A memory store on a manual clock, plus a coordinator over it.
    pub fn manual_clock_cache() -> (Arc<ManualClock>, Arc<MemoryStore>, ReadThroughCache<MemoryStore>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let cache = ReadThroughCache::new(store.clone());
        (clock, store, cache)
    }

    /// A recording store over a fresh memory store, plus a coordinator.
    pub fn recorded_cache(
        scan_batch_size: usize,
    ) -> (Arc<RecordingStore>, ReadThroughCache<RecordingStore>) {
        let store = Arc::new(RecordingStore::new(MemoryStore::new()));
        let cache = ReadThroughCache::new(store.clone()).with_scan_batch_size(scan_batch_size);
        (store, cache)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on cache outcomes.

    use super::*;

    /// Assert that a read was served from the store.
    #[track_caller]
    pub fn assert_hit<T: std::fmt::Debug>(read: &CacheRead<T>) {
        assert_eq!(read.source(), ReadSource::Hit, "Expected cache hit, got: {:?}", read);
    }

    /// Assert that a read computed its value.
    #[track_caller]
    pub fn assert_computed<T: std::fmt::Debug>(read: &CacheRead<T>, expected: ReadSource) {
        assert_ne!(expected, ReadSource::Hit, "use assert_hit for hits");
        assert_eq!(read.source(), expected, "Unexpected read source: {:?}", read);
    }

    /// Assert that a get-or-compute failed on the computed value's schema.
    #[track_caller]
    pub fn assert_invalid_computed<T, E>(result: &Result<T, CacheError<E>>)
    where
        T: std::fmt::Debug,
        E: std::fmt::Debug,
    {
        match result {
            Err(CacheError::InvalidComputedValue { .. }) => {}
            other => panic!("Expected InvalidComputedValue, got: {:?}", other),
        }
    }

    /// Assert that a get-or-compute failed in the store.
    #[track_caller]
    pub fn assert_store_error<T, E>(result: &Result<T, CacheError<E>>)
    where
        T: std::fmt::Debug,
        E: std::fmt::Debug,
    {
        match result {
            Err(CacheError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
