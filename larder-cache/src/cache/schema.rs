//! Value schemas.
//!
//! A [`ValueSchema`] is applied to every value crossing the cache boundary:
//! to blobs read back from the store and to freshly computed values before
//! they are written. Deserializing into `T` checks the shape; the schema
//! then checks whatever the type system cannot (ranges, lengths, enums
//! encoded as strings) and may return a normalized value.

use larder_core::ValidationError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Validator for values of type `T`.
///
/// Any `Fn(T) -> Result<T, ValidationError>` closure is a schema.
pub trait ValueSchema<T>: Send + Sync {
    /// Validate `value`, returning it (possibly normalized) on success.
    fn validate(&self, value: T) -> Result<T, ValidationError>;
}

impl<T, F> ValueSchema<T> for F
where
    F: Fn(T) -> Result<T, ValidationError> + Send + Sync,
{
    fn validate(&self, value: T) -> Result<T, ValidationError> {
        self(value)
    }
}

/// Schema that accepts every value that deserializes into `T`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeOnly;

impl<T> ValueSchema<T> for ShapeOnly {
    fn validate(&self, value: T) -> Result<T, ValidationError> {
        Ok(value)
    }
}

/// Deserialize a stored blob into `T`.
///
/// # Errors
///
/// Returns [`ValidationError::ShapeMismatch`] when the blob is not valid
/// JSON for `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ValidationError> {
    serde_json::from_slice(bytes).map_err(|e| ValidationError::ShapeMismatch {
        reason: e.to_string(),
    })
}

/// Deserialize a stored blob and run it through `schema`.
pub fn decode_with<T, V>(bytes: &[u8], schema: &V) -> Result<T, ValidationError>
where
    T: DeserializeOwned,
    V: ValueSchema<T> + ?Sized,
{
    schema.validate(decode(bytes)?)
}

/// Serialize a value for storage.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Servings {
        count: i64,
    }

    fn non_negative(s: Servings) -> Result<Servings, ValidationError> {
        if s.count < 0 {
            return Err(ValidationError::invalid("count", "must be non-negative"));
        }
        Ok(s)
    }

    #[test]
    fn test_function_is_schema() {
        assert!(non_negative.validate(Servings { count: 3 }).is_ok());
        assert!(non_negative.validate(Servings { count: -1 }).is_err());
    }

    #[test]
    fn test_closure_may_normalize() {
        let clamp = |s: Servings| -> Result<Servings, ValidationError> {
            Ok(Servings {
                count: s.count.min(12),
            })
        };
        assert_eq!(clamp.validate(Servings { count: 40 }).unwrap().count, 12);
    }

    #[test]
    fn test_decode_shape_mismatch() {
        let err = decode::<Servings>(b"{\"total\": 3}").unwrap_err();
        assert!(matches!(err, ValidationError::ShapeMismatch { .. }));

        let err = decode::<Servings>(b"not json").unwrap_err();
        assert!(matches!(err, ValidationError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_decode_with_runs_schema() {
        let bytes = encode(&Servings { count: -5 }).unwrap();
        assert!(decode_with::<Servings, _>(&bytes, &ShapeOnly).is_ok());
        assert!(matches!(
            decode_with::<Servings, _>(&bytes, &non_negative),
            Err(ValidationError::InvalidValue { .. })
        ));
    }
}
