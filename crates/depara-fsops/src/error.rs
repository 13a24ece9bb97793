//! # Design
//!
//! - Provide structured, constant-message errors for file operations.
//! - Capture operation context (paths, fields, inputs) to make failures reproducible in tests.
//! - Preserve source errors without interpolating context into error messages.

use std::io;
use std::path::{Path, PathBuf};

use depara_config::ConfigError;
use thiserror::Error;

/// Result type for filesystem operations.
pub type FsOpsResult<T> = Result<T, FsOpsError>;

/// Errors produced by file operations.
#[derive(Debug, Error)]
pub enum FsOpsError {
    /// Input contained a traversal or expansion sequence.
    #[error("unsafe path")]
    UnsafePath {
        /// Raw input as supplied.
        input: String,
        /// Sequence that triggered the rejection.
        reason: &'static str,
    },
    /// Resolved path falls outside every allowed base directory.
    #[error("access denied")]
    AccessDenied {
        /// Absolute path that was rejected.
        path: PathBuf,
    },
    /// Path required to exist does not.
    #[error("path not found")]
    NotFound {
        /// Missing path.
        path: PathBuf,
    },
    /// Path exists but has the wrong type for the operation.
    #[error("invalid path")]
    InvalidPath {
        /// Offending path.
        path: PathBuf,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// Parent of a write target is missing or not a directory.
    #[error("parent directory not accessible")]
    ParentNotAccessible {
        /// Target whose parent failed the check.
        path: PathBuf,
    },
    /// Input validation failures.
    #[error("invalid input")]
    Validation {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Copy target exists and overwriting is disabled.
    #[error("target exists")]
    TargetExists {
        /// Existing target.
        path: PathBuf,
    },
    /// Pre-operation backup failed; the destructive step was not attempted.
    #[error("backup failed")]
    BackupFailed {
        /// File that could not be backed up.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Source disappeared between resolution and the operation.
    #[error("source not found")]
    SourceNotFound {
        /// Source path.
        path: PathBuf,
    },
    /// IO failures while interacting with the filesystem.
    #[error("fsops io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Walkdir traversal failures.
    #[error("fsops walkdir failure")]
    Walkdir {
        /// Operation that triggered the walkdir failure.
        operation: &'static str,
        /// Path involved in the walkdir failure.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// Globset compilation failures.
    #[error("fsops glob failure")]
    Glob {
        /// Operation that triggered the glob failure.
        operation: &'static str,
        /// Glob pattern that failed to compile.
        pattern: String,
        /// Underlying globset error.
        source: globset::Error,
    },
}

impl FsOpsError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walkdir(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: walkdir::Error,
    ) -> Self {
        Self::Walkdir {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) const fn glob(
        operation: &'static str,
        pattern: String,
        source: globset::Error,
    ) -> Self {
        Self::Glob {
            operation,
            pattern,
            source,
        }
    }

    pub(crate) const fn validation(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::Validation {
            field,
            reason,
            value,
        }
    }

    /// Stable machine-readable code for the variant.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnsafePath { .. } => "unsafe_path",
            Self::AccessDenied { .. } => "access_denied",
            Self::NotFound { .. } => "not_found",
            Self::InvalidPath { .. } => "invalid_path",
            Self::ParentNotAccessible { .. } => "parent_not_accessible",
            Self::Validation { .. } => "validation",
            Self::TargetExists { .. } => "target_exists",
            Self::BackupFailed { .. } => "backup_failed",
            Self::SourceNotFound { .. } => "source_not_found",
            Self::Io { .. } => "io",
            Self::Walkdir { .. } => "walkdir",
            Self::Glob { .. } => "glob",
        }
    }

    /// Filesystem path the error refers to, when there is one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::AccessDenied { path }
            | Self::NotFound { path }
            | Self::InvalidPath { path, .. }
            | Self::ParentNotAccessible { path }
            | Self::TargetExists { path }
            | Self::BackupFailed { path, .. }
            | Self::SourceNotFound { path }
            | Self::Io { path, .. }
            | Self::Walkdir { path, .. } => Some(path),
            Self::UnsafePath { .. } | Self::Validation { .. } | Self::Glob { .. } => None,
        }
    }

    /// Whether the error stems from caller input rather than the filesystem.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::UnsafePath { .. })
    }

    /// Whether the error reports a missing path.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::SourceNotFound { .. })
    }
}

impl From<ConfigError> for FsOpsError {
    fn from(err: ConfigError) -> Self {
        let value = match &err {
            ConfigError::InvalidField { value, .. } => value.clone(),
            _ => None,
        };
        Self::validation(err.field().unwrap_or("config"), err.reason(), value)
    }
}
