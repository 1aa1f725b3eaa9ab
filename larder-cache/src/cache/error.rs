//! Errors returned by the read-through coordinator.

use larder_core::{CacheKey, LarderError, StoreError, ValidationError};
use thiserror::Error;

/// Failure of [`get_or_compute`](super::ReadThroughCache::get_or_compute).
///
/// `E` is the caller's computation error. It is carried through untouched
/// so callers can match on their own error type.
///
/// A cached value that fails decoding or validation is never reported here;
/// it is treated as a miss.
#[derive(Debug, Error)]
pub enum CacheError<E> {
    /// The store failed during GET or SET.
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    /// The computation failed. Nothing was written.
    #[error("Computation failed: {0}")]
    Compute(#[source] E),

    /// The computation returned a value its own schema rejects.
    /// Nothing was written.
    #[error("Computed value for {key} failed validation: {source}")]
    InvalidComputedValue {
        key: CacheKey,
        #[source]
        source: ValidationError,
    },

    /// The validated value could not be serialized. Nothing was written.
    #[error("Failed to encode value for {key}: {reason}")]
    Encode { key: CacheKey, reason: String },
}

impl<E> CacheError<E> {
    /// The computation error, if that is what this is.
    pub fn compute_error(&self) -> Option<&E> {
        match self {
            Self::Compute(e) => Some(e),
            _ => None,
        }
    }

    /// Consume into the computation error, or give `self` back.
    pub fn into_compute_error(self) -> Result<E, Self> {
        match self {
            Self::Compute(e) => Ok(e),
            other => Err(other),
        }
    }

    /// Whether the store failed.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Map the computation error.
    pub fn map_compute<F, E2>(self, f: F) -> CacheError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Store(e) => CacheError::Store(e),
            Self::Compute(e) => CacheError::Compute(f(e)),
            Self::InvalidComputedValue { key, source } => {
                CacheError::InvalidComputedValue { key, source }
            }
            Self::Encode { key, reason } => CacheError::Encode { key, reason },
        }
    }
}

/// Flatten into the workspace error when the computation itself fails with
/// a [`LarderError`].
impl From<CacheError<LarderError>> for LarderError {
    fn from(err: CacheError<LarderError>) -> Self {
        match err {
            CacheError::Store(e) => LarderError::Store(e),
            CacheError::Compute(e) => e,
            CacheError::InvalidComputedValue { source, .. } => LarderError::Validation(source),
            CacheError::Encode { key, reason } => LarderError::Validation(
                ValidationError::invalid("value", format!("{key}: {reason}")),
            ),
        }
    }
}
