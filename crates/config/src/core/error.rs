//! Configuration error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error type
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigError {
    /// A key or value was rejected at the call site
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message describing the rejected argument
        message: String,
    },

    /// A raw value could not be converted to the requested type
    #[error("Failed to parse '{value}' as {target}: {message}")]
    ParseError {
        /// Raw value that failed to parse
        value: String,
        /// Name of the requested type
        target: String,
        /// Error message describing the parse failure
        message: String,
    },

    /// A layer position was outside the valid range
    #[error("Layer index {index} out of bounds (count: {len})")]
    IndexOutOfBounds {
        /// Requested position
        index: usize,
        /// Number of layers at the time of the call
        len: usize,
    },

    /// The operation violates a lifecycle or layer-protection invariant
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Error message describing the violated invariant
        message: String,
    },

    /// Configuration source error
    #[error("Configuration source error: {message}")]
    SourceError {
        /// Error message describing the source error
        message: String,
        /// Origin of the configuration source
        origin: String,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Error message describing the validation failure
        message: String,
        /// Optional field name that failed validation
        field: Option<String>,
    },
}

impl ConfigError {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse_error(
        value: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ParseError {
            value: value.into(),
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create an index out of bounds error
    pub fn index_out_of_bounds(index: usize, len: usize) -> Self {
        Self::IndexOutOfBounds { index, len }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create a source error
    pub fn source_error(message: impl Into<String>, origin: impl Into<String>) -> Self {
        Self::SourceError {
            message: message.into(),
            origin: origin.into(),
        }
    }

    /// Create a validation error
    pub fn validation_error(message: impl Into<String>, field: Option<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field,
        }
    }

    /// Create a validation error with field
    pub fn validation_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Reject an empty key
    pub(crate) fn empty_key() -> Self {
        Self::invalid_argument("key must not be empty")
    }

    /// Reject a null value written under `key`
    pub(crate) fn null_value(key: &str) -> Self {
        Self::invalid_argument(format!("value for property '{key}' is null"))
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, ConfigError::ValidationError { .. })
    }

    /// Check if error is recoverable
    ///
    /// Source and validation failures are isolated to one poll cycle or one
    /// key; everything else indicates programmer misuse.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConfigError::SourceError { .. }
                | ConfigError::ValidationError { .. }
                | ConfigError::ParseError { .. }
        )
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConfigError::InvalidArgument { .. } => ErrorCategory::Argument,
            ConfigError::ParseError { .. } => ErrorCategory::Parse,
            ConfigError::IndexOutOfBounds { .. } => ErrorCategory::Index,
            ConfigError::InvalidOperation { .. } => ErrorCategory::State,
            ConfigError::SourceError { .. } => ErrorCategory::Source,
            ConfigError::ValidationError { .. } => ErrorCategory::Validation,
        }
    }
}

/// Error category for grouping errors
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Null or empty argument
    Argument,
    /// Typed conversion failure
    Parse,
    /// Layer position out of range
    Index,
    /// Lifecycle or invariant violation
    State,
    /// External source failure
    Source,
    /// Value rejected by a validator
    Validation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        assert_eq!(
            ConfigError::empty_key().category(),
            ErrorCategory::Argument
        );
        assert_eq!(
            ConfigError::index_out_of_bounds(4, 2).category(),
            ErrorCategory::Index
        );
        assert_eq!(
            ConfigError::invalid_operation("x").category(),
            ErrorCategory::State
        );
        assert!(ConfigError::source_error("down", "http").is_recoverable());
        assert!(!ConfigError::invalid_operation("x").is_recoverable());
    }

    #[test]
    fn display_includes_context() {
        let err = ConfigError::parse_error("abc", "i32", "invalid digit found in string");
        assert_eq!(
            err.to_string(),
            "Failed to parse 'abc' as i32: invalid digit found in string"
        );
        let err = ConfigError::index_out_of_bounds(5, 3);
        assert_eq!(err.to_string(), "Layer index 5 out of bounds (count: 3)");
    }

    #[test]
    fn validation_helpers() {
        let err = ConfigError::validation_with_field("too large", "pool.size");
        assert!(err.is_validation());
        match err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field.as_deref(), Some("pool.size"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
