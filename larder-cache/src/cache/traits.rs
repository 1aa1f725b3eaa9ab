//! Store adapter contract.
//!
//! This module defines the four primitives the coordinator needs from the
//! external key-value store. Adapters are thin: they never retry, never
//! validate values and never interpret keys.

use std::sync::Arc;

use async_trait::async_trait;
use larder_core::{CacheKey, InvalidationPattern, StoreResult, Ttl};

/// Position in an incremental key scan.
///
/// A scan starts at [`ScanCursor::START`] and is complete when the store
/// hands back [`ScanCursor::START`] again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScanCursor(u64);

impl ScanCursor {
    /// Initial and terminal cursor.
    pub const START: Self = Self(0);

    /// Wrap a raw cursor value returned by a store.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw cursor value to pass back to the store.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the start/done sentinel.
    pub fn is_start(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for ScanCursor {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// One page of an incremental scan.
///
/// A page may be empty while the cursor is not yet [`ScanCursor::START`];
/// the batch size bounds work per call, not the number of keys returned.
/// A key may appear in more than one page of the same scan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanPage {
    /// Cursor to pass to the next `scan` call.
    pub cursor: ScanCursor,
    /// Keys matching the pattern found in this step.
    pub keys: Vec<CacheKey>,
}

impl ScanPage {
    /// Create a page.
    pub fn new(cursor: ScanCursor, keys: Vec<CacheKey>) -> Self {
        Self { cursor, keys }
    }

    /// Whether this is the last page of the scan.
    pub fn is_last(&self) -> bool {
        self.cursor.is_start()
    }
}

/// Minimal interface to an external key-value store with native TTL.
///
/// Implementations must be safe to call concurrently. Every operation is a
/// single round-trip and failures are reported as
/// [`StoreError`](larder_core::StoreError) without retrying.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the raw value stored under `key`.
    ///
    /// Returns `None` if the key is absent or expired.
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, fully replacing any prior value.
    ///
    /// With a TTL the store expires the key after that many seconds; without
    /// one the key persists until deleted.
    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Ttl>) -> StoreResult<()>;

    /// Advance an incremental scan over keys matching `pattern`.
    ///
    /// `batch_size` is a hint for how much of the key space to examine.
    /// Every key that exists for the whole duration of a full scan is
    /// returned at least once. Keys created or deleted during the scan may
    /// or may not be returned.
    async fn scan(
        &self,
        cursor: ScanCursor,
        pattern: &InvalidationPattern,
        batch_size: usize,
    ) -> StoreResult<ScanPage>;

    /// Delete every key in `keys` in a single operation.
    ///
    /// Returns how many of them existed.
    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<u64>;
}

#[async_trait]
impl<S> CacheStore for Arc<S>
where
    S: CacheStore + ?Sized,
{
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Ttl>) -> StoreResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn scan(
        &self,
        cursor: ScanCursor,
        pattern: &InvalidationPattern,
        batch_size: usize,
    ) -> StoreResult<ScanPage> {
        (**self).scan(cursor, pattern, batch_size).await
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<u64> {
        (**self).delete_many(keys).await
    }
}
