//! Error types shared across tickwise crates.

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using the shared error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while bootstrapping the pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration loaded but failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this is a configuration problem (load or validation).
    pub fn is_config(&self) -> bool {
        match self {
            Self::Config(_) | Self::Validation(_) => true,
            Self::WithContext { source, .. } => source.is_config(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_with_context() {
        let err = Error::Config("missing file".into()).with_context("loading pipeline");
        assert!(matches!(err, Error::WithContext { .. }));
        assert!(err.is_config());
        assert_eq!(err.to_string(), "loading pipeline: Configuration error: missing file");
    }

    #[test]
    fn test_validation_is_config() {
        let err: Error = ValidationError::MissingField {
            field: "providers".into(),
        }
        .into();
        assert!(err.is_config());
    }

    #[test]
    fn test_result_ext() {
        let io: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = io.context("reading config").unwrap_err();
        assert!(!err.is_config());
        assert!(err.to_string().starts_with("reading config"));
    }
}
