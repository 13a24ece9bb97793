//! # Design
//!
//! - Centralize application-level errors for the scheduler, the facade and bootstrap.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Expose a coarse class so outer surfaces can pick a response without matching variants.

use std::io;
use std::path::PathBuf;

use depara_config::ConfigError;
use depara_fsops::FsOpsError;
use depara_telemetry::TelemetryError;
use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Coarse grouping used by callers that translate errors into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller supplied an invalid request.
    BadRequest,
    /// Referenced operation or path does not exist.
    NotFound,
    /// Anything else.
    Internal,
}

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: TelemetryError,
    },
    /// File operations failed.
    #[error("file operation failed")]
    FsOps {
        /// Operation identifier.
        operation: &'static str,
        /// Source fsops error.
        source: FsOpsError,
    },
    /// No scheduled operation has the given id.
    #[error("scheduled operation not found")]
    NotFound {
        /// Requested identifier.
        id: String,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// Request values were invalid.
    #[error("invalid request")]
    InvalidRequest {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(operation: &'static str, source: TelemetryError) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn fsops(operation: &'static str, source: FsOpsError) -> Self {
        Self::FsOps { operation, source }
    }

    pub(crate) fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Response class for the error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Config { source, .. } => match source {
                ConfigError::InvalidField { .. }
                | ConfigError::MissingField { .. }
                | ConfigError::InvalidEnv { .. } => ErrorClass::BadRequest,
                _ => ErrorClass::Internal,
            },
            Self::FsOps { source, .. } => {
                if source.is_validation() {
                    ErrorClass::BadRequest
                } else if source.is_not_found() {
                    ErrorClass::NotFound
                } else {
                    ErrorClass::Internal
                }
            }
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::InvalidRequest { .. } => ErrorClass::BadRequest,
            Self::Telemetry { .. } | Self::Io { .. } => ErrorClass::Internal,
        }
    }
}
