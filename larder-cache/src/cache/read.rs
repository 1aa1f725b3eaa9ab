//! Outcome metadata for cache reads.

/// Where the value returned by a read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadSource {
    /// A stored value decoded and passed the schema. Nothing was computed.
    Hit,
    /// Nothing was stored; the value was computed and written.
    Miss,
    /// A stored value failed decoding or validation; the value was
    /// recomputed and overwrote it.
    Refreshed,
}

impl ReadSource {
    /// Whether the value was served from the store.
    pub fn is_hit(self) -> bool {
        matches!(self, Self::Hit)
    }

    /// Whether the value was computed.
    pub fn was_computed(self) -> bool {
        !self.is_hit()
    }
}

/// A value returned by the cache together with its [`ReadSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    source: ReadSource,
}

impl<T> CacheRead<T> {
    /// Wrap a value served from the store.
    pub fn hit(value: T) -> Self {
        Self {
            value,
            source: ReadSource::Hit,
        }
    }

    /// Wrap a value produced by the computation.
    pub fn computed(value: T, source: ReadSource) -> Self {
        Self { value, source }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Where the value came from.
    pub fn source(&self) -> ReadSource {
        self.source
    }

    /// Check if this was a cache hit.
    pub fn was_cache_hit(&self) -> bool {
        self.source.is_hit()
    }

    /// Check if this was a cache miss (computed).
    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit()
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            source: self.source,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
