// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading errors.

use std::path::{Path, PathBuf};

use thiserror::Error;
use trap_uasession::UaError;

/// Errors raised while loading runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file does not exist.
    #[error("File not found: {path}")]
    FileNotFound {
        /// Missing path.
        path: PathBuf,
    },

    /// The file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be parsed.
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// Path of the file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Content could not be deserialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Deserializer message.
        message: String,
    },

    /// The file extension is not supported.
    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat {
        /// Offending extension.
        extension: String,
    },

    /// An override variable holds an invalid value.
    #[error("Invalid environment variable value for '{name}': {message}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// What was expected.
        message: String,
    },

    /// The loaded client configuration is invalid.
    #[error("Invalid client configuration: {0}")]
    Validation(#[from] UaError),
}

impl ConfigError {
    /// Creates a file-not-found error.
    pub fn file_not_found(path: impl AsRef<Path>) -> Self {
        Self::FileNotFound {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates a parse error.
    pub fn parse(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an unsupported-format error.
    pub fn unsupported_format(extension: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            extension: extension.into(),
        }
    }

    /// Creates an invalid-override error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ConfigError::file_not_found("/etc/trap/ua.yaml");
        assert_eq!(err.to_string(), "File not found: /etc/trap/ua.yaml");

        let err = ConfigError::invalid_env_var("TRAP_UA_SESSION_TIMEOUT_MS", "expected a number");
        assert!(err.to_string().contains("TRAP_UA_SESSION_TIMEOUT_MS"));
    }

    #[test]
    fn test_validation_from_ua_error() {
        let err: ConfigError = UaError::invalid_argument("endpoint", "empty").into();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
