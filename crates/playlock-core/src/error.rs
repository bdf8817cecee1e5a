//! Error types for the playlock DRM client

use crate::types::FailureReason;
use thiserror::Error;

/// Result type alias for DRM client operations
pub type Result<T> = std::result::Result<T, Error>;

/// DRM client error types
#[derive(Error, Debug)]
pub enum Error {
    // Registry errors
    #[error("Unknown asset: {asset}")]
    NotFound { asset: String },

    // Acquisition errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("License denied: {0}")]
    Denied(String),

    #[error("Malformed license response: {0}")]
    Malformed(String),

    #[error("License expired")]
    Expired,

    // Playback errors
    #[error("No local content for asset: {asset}")]
    FileNotFound { asset: String },

    #[error("No terminal license event within deadline")]
    Timeout,

    // License store errors
    #[error("License store error: {0}")]
    Storage(String),
}

impl Error {
    /// Create a registry not-found error
    pub fn not_found(asset: impl Into<String>) -> Self {
        Error::NotFound {
            asset: asset.into(),
        }
    }

    /// Create a missing-local-content error
    pub fn file_not_found(asset: impl Into<String>) -> Self {
        Error::FileNotFound {
            asset: asset.into(),
        }
    }

    /// Returns true if retrying the failed request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Classify an acquisition error into the event-facing failure reason
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Error::Network(_) | Error::Timeout => Some(FailureReason::Network),
            Error::Denied(_) => Some(FailureReason::Denied),
            Error::Malformed(_) => Some(FailureReason::Malformed),
            Error::Expired => Some(FailureReason::Expired),
            _ => None,
        }
    }

    /// Returns the error code for logs and CLI output
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Network(_) => "NETWORK",
            Error::Denied(_) => "DENIED",
            Error::Malformed(_) => "MALFORMED",
            Error::Expired => "EXPIRED",
            Error::FileNotFound { .. } => "FILE_NOT_FOUND",
            Error::Timeout => "TIMEOUT",
            Error::Storage(_) => "STORAGE",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Network(error.to_string())
    }
}

impl From<FailureReason> for Error {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::Network => Error::Network("license acquisition failed".to_string()),
            FailureReason::Denied => Error::Denied("license server rejected request".to_string()),
            FailureReason::Malformed => {
                Error::Malformed("unparseable license response".to_string())
            }
            FailureReason::Expired => Error::Expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Network("connection reset".to_string()).is_retryable());
        assert!(!Error::Denied("forbidden".to_string()).is_retryable());
        assert!(!Error::Malformed("bad json".to_string()).is_retryable());
        assert!(!Error::Expired.is_retryable());
        assert!(!Error::not_found("a1").is_retryable());
    }

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(
            Error::Network("x".to_string()).failure_reason(),
            Some(FailureReason::Network)
        );
        assert_eq!(
            Error::Denied("x".to_string()).failure_reason(),
            Some(FailureReason::Denied)
        );
        assert_eq!(Error::Expired.failure_reason(), Some(FailureReason::Expired));
        assert_eq!(Error::not_found("a1").failure_reason(), None);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Timeout.error_code(), "TIMEOUT");
        assert_eq!(Error::not_found("a1").error_code(), "NOT_FOUND");
        assert_eq!(Error::file_not_found("a1").error_code(), "FILE_NOT_FOUND");
    }

    #[test]
    fn test_reason_roundtrip_to_error() {
        let err: Error = FailureReason::Denied.into();
        assert!(matches!(err, Error::Denied(_)));
        let err: Error = FailureReason::Expired.into();
        assert!(matches!(err, Error::Expired));
    }
}
