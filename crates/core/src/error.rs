//! Core error types for Ostia.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// The standard Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Ostia operations.
#[derive(Debug, Error)]
pub enum Error {
    // I/O errors
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    // Parsing errors
    #[error("YAML parse error: {reason}")]
    YamlParseFailed { reason: String },

    #[error("JSON encode error: {reason}")]
    JsonEncodeFailed { reason: String },

    // Definition errors
    #[error("invalid API definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("invalid extension '{extension}' at {location}: {reason}")]
    InvalidExtension {
        extension: String,
        location: String,
        reason: String,
    },
}

impl Error {
    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a YAML parse error.
    pub fn yaml_parse_failed(reason: impl Into<String>) -> Self {
        Self::YamlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a JSON encode error.
    pub fn json_encode_failed(reason: impl Into<String>) -> Self {
        Self::JsonEncodeFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid definition error.
    pub fn invalid_definition(reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            reason: reason.into(),
        }
    }

    /// Create an invalid extension error.
    pub fn invalid_extension(
        extension: impl Into<String>,
        location: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidExtension {
            extension: extension.into(),
            location: location.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_definition("paths must be a mapping");
        assert!(err.to_string().contains("paths must be a mapping"));
    }

    #[test]
    fn test_invalid_extension_names_location() {
        let err = Error::invalid_extension("x-3scale-metrics", "GET /widgets", "expected a list");
        let message = err.to_string();
        assert!(message.contains("x-3scale-metrics"));
        assert!(message.contains("GET /widgets"));
    }
}
