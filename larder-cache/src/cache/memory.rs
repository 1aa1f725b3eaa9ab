//! In-process cache store.
//!
//! [`MemoryStore`] implements [`CacheStore`] on a slot table guarded by a
//! `RwLock`. It is meant for tests and single-process development setups.
//! Expiry is evaluated lazily against an injectable [`Clock`], so TTL
//! behaviour can be tested without sleeping.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use larder_core::{CacheKey, InvalidationPattern, StoreError, StoreResult, Ttl};

use super::traits::{CacheStore, ScanCursor, ScanPage};

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start the clock at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start the clock at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Jump to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Keys live in fixed slots. A key keeps its slot until it is deleted or
/// expires, which lets a scan cursor be a plain slot index: a key present
/// for the whole scan sits at a slot the cursor has to pass.
#[derive(Debug, Default)]
struct Slots {
    slots: Vec<Option<Entry>>,
    index: HashMap<String, usize>,
    free: Vec<usize>,
    /// Table length at which the next insert sweeps expired entries.
    sweep_at: usize,
}

/// Smallest table that is swept on insert.
const MIN_SWEEP_LEN: usize = 64;

impl Slots {
    fn get(&self, key: &str) -> Option<&Entry> {
        self.index
            .get(key)
            .and_then(|&slot| self.slots.get(slot))
            .and_then(Option::as_ref)
    }

    fn upsert(&mut self, entry: Entry) {
        if let Some(&slot) = self.index.get(&entry.key) {
            self.slots[slot] = Some(entry);
            return;
        }
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.index.insert(entry.key.clone(), slot);
        self.slots[slot] = Some(entry);
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let slot = self.index.remove(key)?;
        let entry = self.slots.get_mut(slot).and_then(Option::take);
        self.free.push(slot);
        entry
    }

    /// Sweep expired entries when inserting `key` would grow the table past
    /// the sweep mark. The mark doubles with the live entry count, so each
    /// sweep is paid for by the inserts since the previous one.
    fn reclaim_before_insert(&mut self, key: &str, now: DateTime<Utc>) {
        let grows = !self.index.contains_key(key) && self.free.is_empty();
        if !grows || self.slots.len() < self.sweep_at {
            return;
        }
        self.purge_expired(now);
        let live = self.slots.len() - self.free.len();
        self.sweep_at = live.saturating_mul(2).max(MIN_SWEEP_LEN);
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .slots
            .iter()
            .flatten()
            .filter(|e| !e.is_live(now))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

/// In-memory [`CacheStore`].
///
/// Cloning a `MemoryStore` yields a handle to the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Slots>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that reads time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Slots::default())),
            clock,
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Slots>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Slots>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }

    /// Number of live entries.
    pub fn len(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        Ok(self.read()?.slots.iter().flatten().filter(|e| e.is_live(now)).count())
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether `key` holds a live entry.
    pub fn contains_key(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        Ok(self.read()?.get(key).is_some_and(|e| e.is_live(now)))
    }

    /// Live keys in lexicographic order.
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .read()?
            .slots
            .iter()
            .flatten()
            .filter(|e| e.is_live(now))
            .map(|e| e.key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Time left before `key` expires.
    ///
    /// `None` if the key is absent, expired or has no TTL.
    pub fn time_to_live(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = self.clock.now();
        let guard = self.read()?;
        Ok(guard
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .and_then(|at| (at - now).to_std().ok()))
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        Ok(self.write()?.purge_expired(now))
    }

    /// Remove every entry.
    pub fn clear(&self) -> StoreResult<()> {
        *self.write()? = Slots::default();
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        let now = self.clock.now();
        let guard = self.read()?;
        Ok(guard
            .get(key.as_str())
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Ttl>) -> StoreResult<()> {
        let now = self.clock.now();
        let expires_at = match ttl {
            Some(ttl) => Some(
                i64::try_from(ttl.as_secs())
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .and_then(|delta| now.checked_add_signed(delta))
                    .ok_or_else(|| StoreError::Command {
                        operation: "SET",
                        reason: format!("invalid expire time {ttl}"),
                    })?,
            ),
            None => None,
        };

        let mut guard = self.write()?;
        guard.reclaim_before_insert(key.as_str(), now);
        guard.upsert(Entry {
            key: key.as_str().to_string(),
            value,
            expires_at,
        });
        Ok(())
    }

    async fn scan(
        &self,
        cursor: ScanCursor,
        pattern: &InvalidationPattern,
        batch_size: usize,
    ) -> StoreResult<ScanPage> {
        let matcher = pattern
            .matcher()
            .map_err(|e| StoreError::Command {
                operation: "SCAN",
                reason: e.to_string(),
            })?;
        let now = self.clock.now();
        let guard = self.read()?;

        let start = usize::try_from(cursor.get()).unwrap_or(usize::MAX);
        let end = start
            .saturating_add(batch_size.max(1))
            .min(guard.slots.len());

        let keys = guard
            .slots
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .flatten()
            .filter(|e| e.is_live(now) && matcher.is_match(&e.key))
            .filter_map(|e| CacheKey::new(e.key.as_str()).ok())
            .collect();

        let next = if end >= guard.slots.len() {
            ScanCursor::START
        } else {
            ScanCursor::new(end as u64)
        };
        Ok(ScanPage::new(next, keys))
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let now = self.clock.now();
        let mut guard = self.write()?;
        let mut deleted = 0;
        for key in keys {
            if guard.remove(key.as_str()).is_some_and(|e| e.is_live(now)) {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s).unwrap()
    }

    fn pattern(s: &str) -> InvalidationPattern {
        InvalidationPattern::new(s).unwrap()
    }

    async fn scan_all(store: &MemoryStore, p: &InvalidationPattern, batch: usize) -> Vec<String> {
        let mut cursor = ScanCursor::START;
        let mut out = Vec::new();
        loop {
            let page = store.scan(cursor, p, batch).await.unwrap();
            out.extend(page.keys.clone().into_iter().map(CacheKey::into_string));
            if page.is_last() {
                break;
            }
            cursor = page.cursor;
        }
        out.sort();
        out
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store.set(&key("a"), b"1".to_vec(), None).await.unwrap();
        assert_eq!(store.get(&key("a")).await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(&key("b")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_replaces_value_and_ttl() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = MemoryStore::with_clock(clock.clone());

        store
            .set(&key("a"), b"1".to_vec(), Some(Ttl::from_secs(5).unwrap()))
            .await
            .unwrap();
        store.set(&key("a"), b"2".to_vec(), None).await.unwrap();

        clock.advance(Duration::from_secs(60));
        assert_eq!(store.get(&key("a")).await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = MemoryStore::with_clock(clock.clone());
        store
            .set(&key("a"), b"1".to_vec(), Some(Ttl::from_secs(10).unwrap()))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(9));
        assert!(store.contains_key("a").unwrap());
        assert_eq!(store.time_to_live("a").unwrap(), Some(Duration::from_secs(1)));

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get(&key("a")).await.unwrap(), None);
        assert!(!store.contains_key("a").unwrap());
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_scan_filters_by_pattern() {
        let store = MemoryStore::new();
        for k in ["user:1:a", "user:1:b", "user:2:a", "recipe:1"] {
            store.set(&key(k), vec![], None).await.unwrap();
        }
        assert_eq!(
            scan_all(&store, &pattern("user:1:*"), 100).await,
            vec!["user:1:a", "user:1:b"]
        );
        assert!(scan_all(&store, &pattern("plan:*"), 100).await.is_empty());
    }

    #[tokio::test]
    async fn test_scan_batches_and_empty_pages() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.set(&key(&format!("other:{i}")), vec![], None).await.unwrap();
        }
        store.set(&key("target"), vec![], None).await.unwrap();

        let first = store.scan(ScanCursor::START, &pattern("target"), 3).await.unwrap();
        assert!(first.keys.is_empty());
        assert!(!first.is_last());

        assert_eq!(scan_all(&store, &pattern("target"), 3).await, vec!["target"]);
    }

    #[tokio::test]
    async fn test_scan_skips_expired() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = MemoryStore::with_clock(clock.clone());
        store
            .set(&key("k:short"), vec![], Some(Ttl::from_secs(1).unwrap()))
            .await
            .unwrap();
        store.set(&key("k:long"), vec![], None).await.unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(scan_all(&store, &pattern("k:*"), 10).await, vec!["k:long"]);
    }

    #[tokio::test]
    async fn test_scan_survives_deletes_behind_cursor() {
        let store = MemoryStore::new();
        for i in 0..6 {
            store.set(&key(&format!("k:{i}")), vec![], None).await.unwrap();
        }

        let p = pattern("k:*");
        let first = store.scan(ScanCursor::START, &p, 3).await.unwrap();
        assert_eq!(first.keys.len(), 3);
        store.delete_many(&first.keys).await.unwrap();

        let second = store.scan(first.cursor, &p, 3).await.unwrap();
        assert_eq!(second.keys.len(), 3);
        assert!(second.is_last());
    }

    #[tokio::test]
    async fn test_delete_many_counts_existing() {
        let store = MemoryStore::new();
        store.set(&key("a"), vec![], None).await.unwrap();
        store.set(&key("b"), vec![], None).await.unwrap();

        let deleted = store
            .delete_many(&[key("a"), key("b"), key("missing")])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(store.is_empty().unwrap());
        assert_eq!(store.delete_many(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_freed_slots_are_reused() {
        let store = MemoryStore::new();
        store.set(&key("a"), vec![], None).await.unwrap();
        store.delete_many(&[key("a")]).await.unwrap();
        store.set(&key("b"), vec![], None).await.unwrap();
        assert_eq!(store.read().unwrap().slots.len(), 1);
        assert_eq!(store.keys().unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_expired_entries_keep_slots_below_sweep_mark() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = MemoryStore::with_clock(clock.clone());

        store
            .set(&key("old"), vec![], Some(Ttl::from_secs(1).unwrap()))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2));
        store.set(&key("new"), vec![], None).await.unwrap();

        assert_eq!(store.read().unwrap().slots.len(), 2);
        assert_eq!(store.get(&key("old")).await.unwrap(), None);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_slots_are_swept_when_table_fills() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = MemoryStore::with_clock(clock.clone());
        let short = Some(Ttl::from_secs(1).unwrap());

        for i in 0..MIN_SWEEP_LEN {
            store.set(&key(&format!("old:{i}")), vec![], short).await.unwrap();
        }
        assert_eq!(store.read().unwrap().slots.len(), MIN_SWEEP_LEN);
        clock.advance(Duration::from_secs(2));

        for i in 0..MIN_SWEEP_LEN {
            store.set(&key(&format!("new:{i}")), vec![], None).await.unwrap();
        }

        assert_eq!(store.read().unwrap().slots.len(), MIN_SWEEP_LEN);
        assert_eq!(store.len().unwrap(), MIN_SWEEP_LEN);
        assert!(store.keys().unwrap().iter().all(|k| k.starts_with("new:")));
    }

    #[tokio::test]
    async fn test_longest_ttl_expires() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = MemoryStore::with_clock(clock.clone());
        let ttl = Ttl::from_secs(Ttl::MAX_SECS).unwrap();

        store.set(&key("a"), vec![], Some(ttl)).await.unwrap();
        assert_eq!(store.time_to_live("a").unwrap(), Some(ttl.as_duration()));

        clock.advance(ttl.as_duration());
        assert_eq!(store.get(&key("a")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unrepresentable_expiry_is_an_error() {
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::MAX_UTC - TimeDelta::try_seconds(5).unwrap()));
        let store = MemoryStore::with_clock(clock);

        let err = store
            .set(&key("a"), vec![], Some(Ttl::from_secs(60).unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Command { operation: "SET", .. }));
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set(&key("a"), b"x".to_vec(), None).await.unwrap();
        assert_eq!(other.get(&key("a")).await.unwrap(), Some(b"x".to_vec()));
        other.clear().unwrap();
        assert!(store.is_empty().unwrap());
    }
}
