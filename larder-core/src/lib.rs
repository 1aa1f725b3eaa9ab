//! Larder Core - Cache Types
//!
//! Plain data types shared by every Larder crate: cache keys and the
//! invalidation patterns derived from them, TTLs, the glob dialect used for
//! key matching, configuration and the error hierarchy.
//! This crate does no I/O.

pub mod config;
pub mod error;
pub mod glob;
pub mod key;
pub mod ttl;

pub use config::CacheConfig;
pub use error::{
    ConfigError, LarderError, LarderResult, StoreError, StoreResult, ValidationError,
};
pub use glob::GlobMatcher;
pub use key::{CacheKey, InvalidationPattern, KeyPrefix, SEGMENT_SEPARATOR};
pub use ttl::Ttl;
