//! Error types for the system client.

use thiserror::Error;

/// Result type for system client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the account-management backend or the transport.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested entity does not exist.
    #[error("{entity} '{key}' not found")]
    NotFound { entity: String, key: String },

    /// The backend answered with a non-success status.
    #[error("{operation} failed with status {status}: {body}")]
    UnexpectedStatus {
        operation: String,
        status: u16,
        body: String,
    },

    /// The backend refused the operation.
    #[error("{operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },

    /// The response body could not be decoded.
    #[error("{operation} returned an undecodable response: {reason}")]
    Decode { operation: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Create a not found error.
    pub fn not_found(entity: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    /// Create an unexpected status error.
    pub fn unexpected_status(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::UnexpectedStatus {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    /// Create a rejected error.
    pub fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a config error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Check if this is a not found condition.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("service", "widgets");
        assert_eq!(err.to_string(), "service 'widgets' not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(Error::unexpected_status("list metrics", 503, "").is_retryable());
        assert!(Error::unexpected_status("list metrics", 429, "").is_retryable());
        assert!(!Error::unexpected_status("create metric", 422, "taken").is_retryable());
    }

    #[test]
    fn test_decode_and_config_are_not_retryable() {
        assert!(!Error::decode("list plans", "eof").is_retryable());
        assert!(!Error::config("missing token").is_retryable());
        assert!(!Error::not_found("plan", 4).is_retryable());
    }
}
