//! Time-to-live for cache entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::ValidationError;

/// Positive lifetime of a cache entry, in whole seconds.
///
/// A zero TTL cannot be constructed. Absence of a TTL (`Option<Ttl>::None`)
/// means the entry lives until it is explicitly invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Ttl(u64);

impl Ttl {
    /// Upper bound accepted by [`Ttl::from_secs`]: one hundred 365-day years.
    ///
    /// Redis turns `SET EX` seconds into an absolute millisecond deadline
    /// and rejects values whose deadline overflows, so the bound stays far
    /// below `i64::MAX / 1000`. Every store accepts every valid TTL.
    pub const MAX_SECS: u64 = 100 * 365 * 24 * 60 * 60;

    /// Create a TTL from a number of seconds.
    ///
    /// # Errors
    ///
    /// Returns an error when `secs` is zero or larger than [`Ttl::MAX_SECS`].
    pub fn from_secs(secs: u64) -> Result<Self, ValidationError> {
        if secs == 0 {
            return Err(ValidationError::invalid("ttl", "must be at least one second"));
        }
        if secs > Self::MAX_SECS {
            return Err(ValidationError::invalid(
                "ttl",
                format!("must not exceed {} seconds", Self::MAX_SECS),
            ));
        }
        Ok(Self(secs))
    }

    /// Number of seconds.
    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// The TTL as a [`Duration`].
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl TryFrom<u64> for Ttl {
    type Error = ValidationError;

    fn try_from(secs: u64) -> Result<Self, Self::Error> {
        Self::from_secs(secs)
    }
}

impl TryFrom<Duration> for Ttl {
    type Error = ValidationError;

    /// Sub-second remainders are dropped.
    fn try_from(duration: Duration) -> Result<Self, Self::Error> {
        Self::from_secs(duration.as_secs())
    }
}

impl From<Ttl> for u64 {
    fn from(ttl: Ttl) -> Self {
        ttl.0
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
