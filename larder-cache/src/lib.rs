//! Larder Cache - Read-Through Cache Layer
//!
//! Defines the cache store abstraction, an in-memory store, an optional
//! Redis store and the read-through coordinator built on top of them.

pub mod cache;

pub use cache::{
    CacheError, CacheRead, CacheStore, Clock, ManualClock, MemoryStore, ReadSource,
    ReadThroughCache, ScanCursor, ScanPage, ShapeOnly, SystemClock, ValueSchema,
    DEFAULT_SCAN_BATCH_SIZE,
};

#[cfg(feature = "redis")]
pub use cache::RedisStore;

pub use larder_core::{
    CacheConfig, CacheKey, InvalidationPattern, KeyPrefix, StoreError, StoreResult, Ttl,
    ValidationError,
};
