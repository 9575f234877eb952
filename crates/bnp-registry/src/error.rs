//! Error types for the publish pipeline.

use std::time::Duration;

/// Publish errors.
///
/// Every stage aborts the whole publish on error; the registry write is the
/// only durable effect and it is issued last.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Caller misuse (bad version, restricted access without a scope, ...).
    #[error("{message}")]
    Usage { message: String },

    /// A forced credential override could not be satisfied.
    #[error("auth resolution failed: {message}")]
    AuthResolution { message: String },

    /// Artifact stream could not be read or is malformed.
    #[error("integrity error: {message}")]
    Integrity { message: String },

    /// Provenance could not be generated or verified.
    #[error("{message}")]
    Provenance { message: String },

    /// Registry rejected the request; `message` is the registry's own text.
    #[error("{message}")]
    Registry { status: u16, message: String },

    /// Resource not found (404).
    #[error("not found: {url}")]
    NotFound { url: String },

    /// Rate limit exceeded.
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Network error (timeouts, connection failures, 5xx still being retried).
    #[error("network error: {message}")]
    Network { message: String },

    /// Invalid response from registry.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl PublishError {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub(crate) fn provenance(message: impl Into<String>) -> Self {
        Self::Provenance {
            message: message.into(),
        }
    }

    pub(crate) fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage { .. } => 1,
            Self::Config { .. } => 1,

            // Auth issues
            Self::AuthResolution { .. } => 2,

            // Integrity and provenance
            Self::Integrity { .. } => 4,
            Self::Provenance { .. } => 4,

            // Registry rejected the publish
            Self::Registry { .. } => 3,
            Self::NotFound { .. } => 3,

            // Network/transient
            Self::RateLimited { .. } => 5,
            Self::Network { .. } => 5,

            Self::InvalidResponse { .. } => 6,
        }
    }

    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network { .. })
    }
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for publish operations.
pub type PublishResult<T> = Result<T, PublishError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_message_is_bare() {
        let err = PublishError::usage("You cannot publish a restricted package without a scope.");
        assert_eq!(
            err.to_string(),
            "You cannot publish a restricted package without a scope."
        );
    }

    #[test]
    fn test_registry_message_verbatim() {
        let err = PublishError::Registry {
            status: 403,
            message: "cannot publish over previously published version 1.0.0".into(),
        };
        assert_eq!(
            err.to_string(),
            "cannot publish over previously published version 1.0.0"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(PublishError::Network {
            message: "timeout".into()
        }
        .is_retryable());
        assert!(PublishError::RateLimited { retry_after: None }.is_retryable());
        assert!(!PublishError::provenance("bad").is_retryable());
    }
}
