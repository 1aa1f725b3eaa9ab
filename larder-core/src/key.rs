//! Cache keys and the invalidation patterns derived from them.
//!
//! Read call sites and invalidation call sites should build their strings
//! from the same [`KeyPrefix`]. A prefix yields both the concrete keys that
//! get cached under it and the one pattern that evicts all of them, so the
//! two can no longer drift apart through a typo or a differing suffix.
//!
//! ```
//! use larder_core::{KeyPrefix, InvalidationPattern};
//!
//! let saved = KeyPrefix::new("user").segment(42).segment("saved_recipes");
//!
//! let count_key = saved.key(["count"]);
//! let page_key = saved.key(["page", "2"]);
//! assert_eq!(count_key.as_str(), "user:42:saved_recipes:count");
//! assert_eq!(page_key.as_str(), "user:42:saved_recipes:page:2");
//!
//! let pattern: InvalidationPattern = saved.pattern();
//! assert_eq!(pattern.as_str(), "user:42:saved_recipes:*");
//! assert!(pattern.matches(count_key.as_str()));
//! assert!(!pattern.matches("user:420:saved_recipes:count"));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::glob::{self, GlobMatcher};
use crate::ValidationError;

/// Separator placed between key segments.
pub const SEGMENT_SEPARATOR: &str = ":";

/// An opaque, non-empty cache key.
///
/// The coordinator never looks inside a key. Callers are responsible for
/// encoding every input that affects the cached value into it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a caller-built key string.
    ///
    /// # Errors
    ///
    /// Returns an error when `key` is empty.
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "key".to_string(),
            });
        }
        Ok(Self(key))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for CacheKey {
    type Error = ValidationError;

    fn try_from(key: String) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

impl TryFrom<&str> for CacheKey {
    type Error = ValidationError;

    fn try_from(key: &str) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered list of key segments shared by a family of cache keys.
///
/// Segments are rendered with `Display` and joined with `:`. A `:` inside
/// a segment is written as `%3A` (and `%` as `%25`), so a segment can never
/// pass for two: `segment("4:2")` does not fall under `segment(4)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix {
    segments: Vec<String>,
}

impl KeyPrefix {
    /// Start a prefix with its namespace segment (e.g. `"user"`, `"recipe"`).
    pub fn new(namespace: impl fmt::Display) -> Self {
        Self {
            segments: vec![encode_segment(&namespace.to_string())],
        }
    }

    /// Append a segment.
    #[must_use]
    pub fn segment(mut self, segment: impl fmt::Display) -> Self {
        self.segments.push(encode_segment(&segment.to_string()));
        self
    }

    /// Segments of this prefix, as they appear in keys.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Build a concrete key under this prefix.
    ///
    /// `rest` holds the remaining segments (filters, sort order, page...).
    /// At least one is expected so that the key falls under [`Self::pattern`];
    /// an empty `rest` yields the bare prefix, which the pattern does not cover.
    pub fn key<I, S>(&self, rest: I) -> CacheKey
    where
        I: IntoIterator<Item = S>,
        S: fmt::Display,
    {
        let mut key = self.render();
        for segment in rest {
            key.push_str(SEGMENT_SEPARATOR);
            key.push_str(&encode_segment(&segment.to_string()));
        }
        // An empty namespace with no further segments renders as "".
        if key.is_empty() {
            key.push_str(SEGMENT_SEPARATOR);
        }
        CacheKey(key)
    }

    /// The pattern matching every key built with [`Self::key`] from this prefix.
    pub fn pattern(&self) -> InvalidationPattern {
        let mut pattern = String::new();
        for segment in &self.segments {
            pattern.push_str(&glob::escape(segment));
            pattern.push_str(SEGMENT_SEPARATOR);
        }
        pattern.push('*');
        InvalidationPattern::from_trusted(pattern)
    }

    fn render(&self) -> String {
        self.segments.join(SEGMENT_SEPARATOR)
    }
}

fn encode_segment(segment: &str) -> String {
    if !segment.contains(['%', ':']) {
        return segment.to_string();
    }
    segment.replace('%', "%25").replace(':', "%3A")
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A glob pattern selecting keys to evict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvalidationPattern(String);

impl InvalidationPattern {
    /// Accept a caller-built glob such as `user_42_*`.
    ///
    /// # Errors
    ///
    /// Returns an error when the pattern is empty or not a well-formed glob.
    pub fn new(pattern: impl Into<String>) -> Result<Self, ValidationError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "pattern".to_string(),
            });
        }
        GlobMatcher::new(&pattern)?;
        Ok(Self(pattern))
    }

    /// A pattern that matches exactly one key.
    pub fn exact(key: &CacheKey) -> Self {
        Self(glob::escape(key.as_str()))
    }

    fn from_trusted(pattern: String) -> Self {
        Self(pattern)
    }

    /// The glob string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the pattern contains any wildcard.
    pub fn is_literal(&self) -> bool {
        !glob::has_wildcards(&self.0)
    }

    /// Compile the pattern for local matching.
    ///
    /// # Errors
    ///
    /// Patterns are checked on construction; this only fails if the
    /// translated regex exceeds the regex size limit.
    pub fn matcher(&self) -> Result<GlobMatcher, ValidationError> {
        GlobMatcher::new(&self.0)
    }

    /// Test a single key against the pattern.
    pub fn matches(&self, key: &str) -> bool {
        self.matcher().is_ok_and(|m| m.is_match(key))
    }
}

impl TryFrom<String> for InvalidationPattern {
    type Error = ValidationError;

    fn try_from(pattern: String) -> Result<Self, Self::Error> {
        Self::new(pattern)
    }
}

impl TryFrom<&str> for InvalidationPattern {
    type Error = ValidationError;

    fn try_from(pattern: &str) -> Result<Self, Self::Error> {
        Self::new(pattern)
    }
}

impl From<InvalidationPattern> for String {
    fn from(pattern: InvalidationPattern) -> Self {
        pattern.0
    }
}

impl From<&KeyPrefix> for InvalidationPattern {
    fn from(prefix: &KeyPrefix) -> Self {
        prefix.pattern()
    }
}

impl From<&CacheKey> for InvalidationPattern {
    fn from(key: &CacheKey) -> Self {
        Self::exact(key)
    }
}

impl fmt::Display for InvalidationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
