//! Result type and utilities for configuration operations

use super::error::ConfigError;

/// Standard result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Extension trait for Result types to add configuration-specific utilities
pub trait ConfigResultExt<T> {
    /// Convert error with additional context
    ///
    /// Source errors keep their origin and get the context prepended to the
    /// message; any other error is wrapped into a source error whose origin
    /// is the original error text.
    fn with_context<F>(self, f: F) -> ConfigResult<T>
    where
        F: FnOnce() -> String;

    /// Convert to option, logging error if present
    fn log_error(self) -> Option<T>;
}

impl<T> ConfigResultExt<T> for ConfigResult<T> {
    fn with_context<F>(self, f: F) -> ConfigResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e {
            ConfigError::SourceError { message, origin } => {
                let ctx = f();
                ConfigError::SourceError {
                    message: format!("{ctx}: {message}"),
                    origin,
                }
            }
            other => ConfigError::SourceError {
                message: f(),
                origin: other.to_string(),
            },
        })
    }

    fn log_error(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "configuration error");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_context_prefixes_source_errors() {
        let result: ConfigResult<i32> = Err(ConfigError::source_error("timed out", "http"));
        let err = result
            .with_context(|| "initial load".to_string())
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::source_error("initial load: timed out", "http")
        );
    }

    #[test]
    fn with_context_wraps_other_errors() {
        let result: ConfigResult<i32> = Err(ConfigError::validation_error("test", None));
        let err = result
            .with_context(|| "Additional context".to_string())
            .unwrap_err();
        assert!(matches!(err, ConfigError::SourceError { .. }));
    }

    #[test]
    fn log_error_drops_the_error() {
        let result: ConfigResult<i32> = Err(ConfigError::invalid_operation("twice"));
        assert_eq!(result.log_error(), None);
        assert_eq!(Ok::<_, ConfigError>(7).log_error(), Some(7));
    }
}
