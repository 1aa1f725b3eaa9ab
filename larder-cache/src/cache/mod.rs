//! Read-through cache with schema validation and pattern invalidation.
//!
//! The coordinator sits between request handlers and the system of record.
//! A read either returns a stored value that still satisfies the caller's
//! schema or runs the caller's computation and stores its result. Writers
//! evict derived values by pattern after every mutation.
//!
//! # Validation asymmetry
//!
//! A stored value that no longer decodes or no longer satisfies the schema
//! (because the value type changed between deploys, for example) is a miss:
//! it is logged, recomputed and overwritten. A computed value that fails the
//! schema is a bug in the computation and is returned as an error without
//! being cached.
//!
//! # Example
//!
//! ```ignore
//! let cache = ReadThroughCache::new(Arc::new(MemoryStore::new()));
//! let recipes = KeyPrefix::new("user").segment(user_id);
//!
//! let count: i64 = cache
//!     .get_or_compute(&recipes.key(["saved_count"]), None, &non_negative, || async {
//!         db.count_saved(user_id).await
//!     })
//!     .await?;
//!
//! db.save_recipe(user_id, recipe_id).await?;
//! cache.invalidate_prefix(&recipes).await?;
//! ```

pub mod error;
pub mod memory;
pub mod read;
pub mod read_through;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod schema;
pub mod traits;

pub use error::CacheError;
pub use memory::{Clock, ManualClock, MemoryStore, SystemClock};
pub use read::{CacheRead, ReadSource};
pub use read_through::{ReadThroughCache, DEFAULT_SCAN_BATCH_SIZE};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use schema::{ShapeOnly, ValueSchema};
pub use traits::{CacheStore, ScanCursor, ScanPage};
