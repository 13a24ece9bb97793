//! Error types for configuration loading and validation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: &'static str,
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// A field required by the selected action was absent.
    #[error("missing configuration field")]
    MissingField {
        /// Section the field belongs to.
        section: &'static str,
        /// Name of the missing field.
        field: &'static str,
    },
    /// Environment override could not be parsed.
    #[error("invalid environment override")]
    InvalidEnv {
        /// Environment variable name.
        name: String,
        /// Raw value supplied.
        value: String,
    },
    /// Reading the configuration file failed.
    #[error("configuration io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// Parsing the configuration document failed.
    #[error("configuration parse failure")]
    Json {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source serde error.
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        section: &'static str,
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidField {
            section,
            field,
            value,
            reason,
        }
    }

    /// Name of the field implicated by the error, when one applies.
    #[must_use]
    pub const fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidField { field, .. } | Self::MissingField { field, .. } => Some(field),
            Self::InvalidEnv { .. } | Self::Io { .. } | Self::Json { .. } => None,
        }
    }

    /// Machine-readable reason for field-level failures.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidField { reason, .. } => reason,
            Self::MissingField { .. } => "missing",
            Self::InvalidEnv { .. } => "invalid_env",
            Self::Io { .. } => "io",
            Self::Json { .. } => "parse",
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
