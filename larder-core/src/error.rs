//! Error types for Larder cache operations

use std::time::Duration;
use thiserror::Error;

/// Backing store errors.
///
/// These are the transient failures of the external key-value store. They
/// are surfaced to callers as-is; nothing in this workspace retries them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Cache store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache store {operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("Cache store {operation} failed: {reason}")]
    Command {
        operation: &'static str,
        reason: String,
    },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ValidationError::ConstraintViolation`].
    pub fn constraint(constraint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            constraint: constraint.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Larder errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LarderError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for store adapter operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for Larder operations.
pub type LarderResult<T> = Result<T, LarderError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_timeout() {
        let err = StoreError::Timeout {
            operation: "GET",
            elapsed: Duration::from_millis(2000),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("GET"));
        assert!(msg.contains("timed out"));
        assert!(msg.contains("2s"));
    }

    #[test]
    fn test_store_error_display_command() {
        let err = StoreError::Command {
            operation: "SCAN",
            reason: "WRONGTYPE".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("SCAN"));
        assert!(msg.contains("WRONGTYPE"));
    }

    #[test]
    fn test_validation_error_helpers() {
        let err = ValidationError::invalid("count", "must be non-negative");
        assert_eq!(
            err,
            ValidationError::InvalidValue {
                field: "count".to_string(),
                reason: "must be non-negative".to_string(),
            }
        );

        let err = ValidationError::constraint("max_items", "got 51");
        let msg = format!("{}", err);
        assert!(msg.contains("max_items"));
        assert!(msg.contains("got 51"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "LARDER_SCAN_BATCH_SIZE".to_string(),
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("LARDER_SCAN_BATCH_SIZE"));
        assert!(msg.contains("must be greater than zero"));
    }

    #[test]
    fn test_larder_error_from_variants() {
        let store = LarderError::from(StoreError::LockPoisoned);
        assert!(matches!(store, LarderError::Store(_)));

        let validation = LarderError::from(ValidationError::RequiredFieldMissing {
            field: "title".to_string(),
        });
        assert!(matches!(validation, LarderError::Validation(_)));

        let config = LarderError::from(ConfigError::MissingRequired {
            field: "LARDER_REDIS_URL".to_string(),
        });
        assert!(matches!(config, LarderError::Config(_)));
    }
}
