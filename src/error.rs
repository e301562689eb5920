//! Error types for the fetch engine.
//!
//! There are exactly three non-recoverable failure kinds (see the design doc):
//! a data source silently dropping a requested key, a data source's own
//! effect failing, and an explicit [`crate::ast::error`] baked into the AST
//! by the caller. All three abort the run; there is no retry policy here —
//! that is left entirely to data sources.

use thiserror::Error;

/// The engine's error type.
#[derive(Error, Debug)]
pub enum FetchError {
    /// A data source's batch response omitted one or more requested keys.
    #[error("data source '{source}' did not return a response for: {requests:?}")]
    MissingIdentity {
        /// The data source that dropped the key(s).
        source: String,
        /// Debug representation of the missing requests.
        requests: Vec<String>,
    },

    /// A data source's `fetch` effect itself failed.
    #[error("data source '{source}' failed: {inner}")]
    SourceFailure {
        /// The data source that failed.
        source: String,
        /// The underlying error. `anyhow::Error` deliberately does not
        /// implement `std::error::Error`, so this can't be wired up via
        /// `#[source]`; callers that want the chain can match on this field.
        inner: anyhow::Error,
    },

    /// An explicit `error(e)` baked into the Fetch description.
    #[error("{0}")]
    UserError(anyhow::Error),
}

/// Error category for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A data source omitted a requested key.
    MissingIdentity,
    /// A data source's effect failed.
    SourceFailure,
    /// An explicit error embedded in the AST.
    UserError,
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, FetchError>;

impl FetchError {
    /// Build a [`FetchError::SourceFailure`] from any error type.
    pub fn source_failure(source: impl Into<String>, err: impl Into<anyhow::Error>) -> Self {
        FetchError::SourceFailure {
            source: source.into(),
            inner: err.into(),
        }
    }

    /// Build a [`FetchError::MissingIdentity`] for one or more requests.
    pub fn missing_identity(source: impl Into<String>, requests: Vec<String>) -> Self {
        FetchError::MissingIdentity {
            source: source.into(),
            requests,
        }
    }

    /// Categorize the error for logging/metrics.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingIdentity { .. } => ErrorCategory::MissingIdentity,
            Self::SourceFailure { .. } => ErrorCategory::SourceFailure,
            Self::UserError(_) => ErrorCategory::UserError,
        }
    }

    /// The data source name involved, if any.
    pub fn source_name(&self) -> Option<&str> {
        match self {
            Self::MissingIdentity { source, .. } => Some(source),
            Self::SourceFailure { source, .. } => Some(source),
            Self::UserError(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_failure_category() {
        let err = FetchError::source_failure("articles", anyhow::anyhow!("boom"));
        assert_eq!(err.category(), ErrorCategory::SourceFailure);
        assert_eq!(err.source_name(), Some("articles"));
    }

    #[test]
    fn test_missing_identity_category() {
        let err = FetchError::missing_identity("articles", vec!["1".to_string()]);
        assert_eq!(err.category(), ErrorCategory::MissingIdentity);
        assert_eq!(err.source_name(), Some("articles"));
        assert!(err.to_string().contains("articles"));
    }

    #[test]
    fn test_user_error_has_no_source_name() {
        let err = FetchError::UserError(anyhow::anyhow!("nope"));
        assert_eq!(err.category(), ErrorCategory::UserError);
        assert_eq!(err.source_name(), None);
    }
}
