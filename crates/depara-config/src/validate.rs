//! Validation helpers and parsing utilities for operation definitions and engine settings.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use tracing::warn;

use crate::defaults::{DEFAULT_FREQUENCY, MAX_FREQUENCY};
use crate::error::{ConfigError, ConfigResult};
use crate::model::{EngineConfig, OperationConfig};

/// Parse a `<digits><s|m|h|d>` frequency string. Returns `None` for anything else, including zero
/// and intervals longer than [`MAX_FREQUENCY`].
#[must_use]
pub fn parse_frequency(value: &str) -> Option<Duration> {
    let value = value.trim();
    let unit = value.chars().last()?;
    let digits = &value[..value.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        _ => return None,
    };
    let secs = amount.checked_mul(multiplier)?;
    let period = Duration::from_secs(secs);
    (secs > 0 && period <= MAX_FREQUENCY).then_some(period)
}

/// Parse a frequency, falling back to sixty seconds when it is malformed.
#[must_use]
pub fn frequency_or_default(value: &str) -> Duration {
    parse_frequency(value).unwrap_or_else(|| {
        warn!(
            frequency = value,
            default_ms = DEFAULT_FREQUENCY.as_millis(),
            "unparseable frequency; using default interval"
        );
        DEFAULT_FREQUENCY
    })
}

/// Validate an operation definition before it is stored.
///
/// # Errors
///
/// Returns [`ConfigError`] when the source is empty, a move/copy lacks a usable target,
/// the name filter is not a valid regular expression, or the suffix contains separators.
pub fn validate_operation(config: &OperationConfig) -> ConfigResult<()> {
    if is_blank(&config.source_path) {
        return Err(ConfigError::MissingField {
            section: "operation",
            field: "source_path",
        });
    }

    if config.action.requires_target() {
        let target = config
            .target_path
            .as_deref()
            .filter(|target| !is_blank(target))
            .ok_or(ConfigError::MissingField {
                section: "operation",
                field: "target_path",
            })?;
        if target == config.source_path {
            return Err(ConfigError::invalid(
                "operation",
                "target_path",
                "equals_source",
                Some(target.display().to_string()),
            ));
        }
    }

    let filters = &config.options.filters;
    if let Some(pattern) = filters.pattern.as_deref() {
        Regex::new(pattern).map_err(|_| {
            ConfigError::invalid(
                "operation",
                "filters.pattern",
                "invalid_regex",
                Some(pattern.to_string()),
            )
        })?;
    }
    if let Some(empty) = filters.extensions.iter().find(|ext| ext.trim().is_empty()) {
        return Err(ConfigError::invalid(
            "operation",
            "filters.extensions",
            "empty_entry",
            Some(empty.clone()),
        ));
    }
    if let Some(suffix) = config.options.suffix.as_deref()
        && (suffix.contains('/') || suffix.contains('\\'))
    {
        return Err(ConfigError::invalid(
            "operation",
            "suffix",
            "path_separator",
            Some(suffix.to_string()),
        ));
    }

    Ok(())
}

/// Validate the engine configuration document.
///
/// # Errors
///
/// Returns [`ConfigError`] for out-of-range or malformed settings.
pub fn validate_engine_config(config: &EngineConfig) -> ConfigResult<()> {
    if is_blank(&config.backup.backup_dir) {
        return Err(ConfigError::MissingField {
            section: "backup",
            field: "backup_dir",
        });
    }
    if config.backup.retention_days == 0 {
        return Err(ConfigError::invalid(
            "backup",
            "retention_days",
            "must_be_positive",
            Some("0".into()),
        ));
    }
    if parse_frequency(&config.backup.cleanup_interval).is_none() {
        return Err(ConfigError::invalid(
            "backup",
            "cleanup_interval",
            "format",
            Some(config.backup.cleanup_interval.clone()),
        ));
    }
    if config.batch.max_concurrency == 0 {
        return Err(ConfigError::invalid(
            "batch",
            "max_concurrency",
            "must_be_positive",
            Some("0".into()),
        ));
    }
    if let Some(format) = config.app.log_format.as_deref()
        && !matches!(format, "pretty" | "json")
    {
        return Err(ConfigError::invalid(
            "app",
            "log_format",
            "unsupported",
            Some(format.to_string()),
        ));
    }
    if let Some(empty) = config
        .ignore
        .extra_patterns
        .iter()
        .find(|pattern| pattern.trim().is_empty())
    {
        return Err(ConfigError::invalid(
            "ignore",
            "extra_patterns",
            "empty_pattern",
            Some(empty.clone()),
        ));
    }
    for seeded in &config.operations {
        validate_operation(&seeded.config)?;
    }
    Ok(())
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().trim().is_empty()
}
