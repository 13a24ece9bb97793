//! Typed configuration models and operation definitions.
//!
//! # Design
//! - Pure data carriers shared by the scheduler, the fsops pipeline, and the loader.
//! - Wire names are camelCase so collaborators can send the same JSON they always have.
//! - Every field has a default; validation happens on write, not on read.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::ConfigError;

/// Primitive file operation applied by a schedule or a direct call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    /// Rename (or copy + remove across devices) into the target.
    Move,
    /// Copy bytes into the target, leaving the source in place.
    Copy,
    /// Remove the source, optionally after a backup.
    Delete,
}

impl FileAction {
    /// Render the action as its lowercase wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Delete => "delete",
        }
    }

    /// Whether the action needs a target path.
    #[must_use]
    pub const fn requires_target(self) -> bool {
        matches!(self, Self::Move | Self::Copy)
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "move" => Ok(Self::Move),
            "copy" => Ok(Self::Copy),
            "delete" => Ok(Self::Delete),
            _ => Err(ConfigError::invalid(
                "operation",
                "action",
                "unsupported",
                Some(s.to_string()),
            )),
        }
    }
}

/// User filters applied to each enumerated file during a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OperationFilters {
    /// Extension allow-list without the leading dot; empty admits everything.
    pub extensions: Vec<String>,
    /// Regular expression tested against the file name.
    pub pattern: Option<String>,
    /// Minimum age in seconds since last modification.
    pub min_age: Option<u64>,
    /// Minimum size in bytes.
    pub min_size: Option<u64>,
}

impl OperationFilters {
    /// Whether no filter is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
            && self.pattern.is_none()
            && self.min_age.is_none()
            && self.min_size.is_none()
    }
}

/// Per-operation switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OperationOptions {
    /// Treat a directory source as a batch over its tree.
    pub batch: bool,
    /// Mirror relative paths under the target instead of flattening.
    pub preserve_structure: bool,
    /// Back up the source before moving it.
    pub backup_before_move: bool,
    /// Back up before delete even when backups are globally disabled.
    pub force_backup: bool,
    /// Batch filters.
    pub filters: OperationFilters,
    /// Insert a timestamp into destination file names.
    pub add_timestamp: bool,
    /// Suffix appended to destination file stems.
    pub suffix: Option<String>,
    /// Replace an existing copy target.
    pub overwrite: bool,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            batch: false,
            preserve_structure: false,
            backup_before_move: false,
            force_backup: false,
            filters: OperationFilters::default(),
            add_timestamp: false,
            suffix: None,
            overwrite: true,
        }
    }
}

/// Recurring operation definition owned by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationConfig {
    /// Optional human label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Frequency string such as `30s`, `5m`, `1h`, `1d`.
    pub frequency: String,
    /// Action to perform on each tick.
    pub action: FileAction,
    /// File or directory the action reads from.
    pub source_path: PathBuf,
    /// Destination for move and copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<PathBuf>,
    /// Operation switches.
    #[serde(default)]
    pub options: OperationOptions,
}

impl OperationConfig {
    /// Build a definition with default options.
    #[must_use]
    pub fn new(
        frequency: impl Into<String>,
        action: FileAction,
        source_path: impl Into<PathBuf>,
        target_path: Option<PathBuf>,
    ) -> Self {
        Self {
            name: None,
            frequency: frequency.into(),
            action,
            source_path: source_path.into(),
            target_path,
            options: OperationOptions::default(),
        }
    }

    /// Replace the options block.
    #[must_use]
    pub fn with_options(mut self, options: OperationOptions) -> Self {
        self.options = options;
        self
    }

    /// Target path when the action uses one.
    #[must_use]
    pub fn target(&self) -> Option<&Path> {
        if self.action.requires_target() {
            self.target_path.as_deref()
        } else {
            None
        }
    }

    /// Shallow merge: supplied fields overwrite, omitted fields are kept, `options` is replaced whole.
    #[must_use]
    pub fn merged(&self, patch: OperationPatch) -> Self {
        Self {
            name: patch.name.or_else(|| self.name.clone()),
            frequency: patch.frequency.unwrap_or_else(|| self.frequency.clone()),
            action: patch.action.unwrap_or(self.action),
            source_path: patch
                .source_path
                .unwrap_or_else(|| self.source_path.clone()),
            target_path: patch.target_path.or_else(|| self.target_path.clone()),
            options: patch.options.unwrap_or_else(|| self.options.clone()),
        }
    }
}

/// Partial operation definition used by edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OperationPatch {
    /// New label.
    pub name: Option<String>,
    /// New frequency string.
    pub frequency: Option<String>,
    /// New action.
    pub action: Option<FileAction>,
    /// New source path.
    pub source_path: Option<PathBuf>,
    /// New target path.
    pub target_path: Option<PathBuf>,
    /// Complete replacement options block.
    pub options: Option<OperationOptions>,
}

/// Operation declared in the configuration file and scheduled at start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeededOperation {
    /// Identifier; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Definition body.
    #[serde(flatten)]
    pub config: OperationConfig,
}

/// Application-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Install directory; part of the path allow-list and base for relative paths.
    pub install_dir: PathBuf,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
    /// `pretty` or `json`; inferred from the build profile when absent.
    pub log_format: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            install_dir: PathBuf::from("."),
            log_level: defaults::LOG_LEVEL.to_string(),
            log_format: None,
        }
    }
}

/// Path allow-list settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Extra base directories admitted by the path guard.
    pub allowed_roots: Vec<PathBuf>,
    /// Whether the built-in bases (home, `/tmp`, `/mnt`, ...) are admitted.
    pub include_default_roots: bool,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            allowed_roots: Vec::new(),
            include_default_roots: true,
        }
    }
}

/// Backup vault settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Whether deletes are backed up without `forceBackup`.
    pub enabled: bool,
    /// Directory receiving backups.
    pub backup_dir: PathBuf,
    /// Days a backup survives the retention sweep.
    pub retention_days: u32,
    /// Gzip backup copies.
    pub compress_backups: bool,
    /// Cadence of the retention sweep.
    pub cleanup_interval: String,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backup_dir: PathBuf::from(defaults::BACKUP_DIR_NAME),
            retention_days: defaults::BACKUP_RETENTION_DAYS,
            compress_backups: false,
            cleanup_interval: defaults::BACKUP_CLEANUP_INTERVAL.to_string(),
        }
    }
}

impl BackupSettings {
    /// Retention window as a duration.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days as u64 * 86_400)
    }

    /// Merge a partial update.
    pub fn apply(&mut self, patch: BackupPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(dir) = patch.backup_dir {
            self.backup_dir = dir;
        }
        if let Some(days) = patch.retention_days {
            self.retention_days = days;
        }
        if let Some(compress) = patch.compress_backups {
            self.compress_backups = compress;
        }
    }
}

/// Partial backup settings accepted by `updateBackupConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackupPatch {
    /// New enabled flag.
    pub enabled: Option<bool>,
    /// New backup directory.
    pub backup_dir: Option<PathBuf>,
    /// New retention in days.
    pub retention_days: Option<u32>,
    /// New compression flag.
    pub compress_backups: Option<bool>,
}

/// Batch execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Requested concurrency; capped at [`defaults::MAX_BATCH_CONCURRENCY`].
    pub max_concurrency: usize,
    /// Pause between batches in milliseconds.
    pub pause_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: defaults::MAX_BATCH_CONCURRENCY,
            pause_ms: defaults::BATCH_PAUSE_MS,
        }
    }
}

impl BatchSettings {
    /// Files processed concurrently per batch.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.max_concurrency
            .clamp(1, defaults::MAX_BATCH_CONCURRENCY)
    }

    /// Cool-down between batches.
    #[must_use]
    pub const fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

/// Ignore-matcher settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreSettings {
    /// Extra patterns appended to the built-in groups.
    pub extra_patterns: Vec<String>,
}

/// Progress store hygiene settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    /// Age after which terminal snapshots are swept.
    pub retention_secs: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            retention_secs: defaults::PROGRESS_RETENTION_SECS,
        }
    }
}

impl ProgressSettings {
    /// Retention as a duration.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Application settings.
    pub app: AppSettings,
    /// Path guard settings.
    pub paths: PathSettings,
    /// Backup vault settings.
    pub backup: BackupSettings,
    /// Batch runner settings.
    pub batch: BatchSettings,
    /// Ignore matcher settings.
    pub ignore: IgnoreSettings,
    /// Progress store settings.
    pub progress: ProgressSettings,
    /// Operations scheduled at start-up.
    pub operations: Vec<SeededOperation>,
}

impl EngineConfig {
    /// Resolve relative directories against the install directory.
    #[must_use]
    pub fn resolved(mut self) -> Self {
        let install = std::path::absolute(&self.app.install_dir)
            .unwrap_or_else(|_| self.app.install_dir.clone());
        if self.backup.backup_dir.is_relative() {
            self.backup.backup_dir = install.join(&self.backup.backup_dir);
        }
        self.app.install_dir = install;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_parses_case_insensitively() -> anyhow::Result<()> {
        assert_eq!("Move".parse::<FileAction>()?, FileAction::Move);
        assert_eq!(" copy ".parse::<FileAction>()?, FileAction::Copy);
        assert_eq!("delete".parse::<FileAction>()?, FileAction::Delete);
        let err = "rename".parse::<FileAction>().unwrap_err();
        assert_eq!(err.field(), Some("action"));
        assert!(FileAction::Copy.requires_target());
        assert!(!FileAction::Delete.requires_target());
        Ok(())
    }

    #[test]
    fn operation_config_reads_camel_case_payloads() -> anyhow::Result<()> {
        let config: OperationConfig = serde_json::from_value(json!({
            "frequency": "30s",
            "action": "move",
            "sourcePath": "/tmp/src/file.txt",
            "targetPath": "/tmp/dst/file.txt",
            "options": {
                "batch": true,
                "backupBeforeMove": true,
                "filters": { "extensions": ["jpg"], "minSize": 10 }
            }
        }))?;
        assert_eq!(config.action, FileAction::Move);
        assert!(config.options.batch);
        assert!(config.options.backup_before_move);
        assert!(config.options.overwrite);
        assert_eq!(config.options.filters.min_size, Some(10));
        assert_eq!(config.target(), Some(Path::new("/tmp/dst/file.txt")));
        Ok(())
    }

    #[test]
    fn merge_keeps_omitted_fields_and_replaces_options() {
        let mut options = OperationOptions {
            batch: true,
            suffix: Some("_old".into()),
            ..OperationOptions::default()
        };
        let base = OperationConfig::new(
            "5m",
            FileAction::Copy,
            "/tmp/a",
            Some(PathBuf::from("/tmp/b")),
        )
        .with_options(options.clone());

        let merged = base.merged(OperationPatch {
            frequency: Some("1h".into()),
            ..OperationPatch::default()
        });
        assert_eq!(merged.frequency, "1h");
        assert_eq!(merged.source_path, PathBuf::from("/tmp/a"));
        assert_eq!(merged.options, options);

        options = OperationOptions::default();
        let replaced = base.merged(OperationPatch {
            options: Some(options.clone()),
            ..OperationPatch::default()
        });
        assert!(!replaced.options.batch);
        assert_eq!(replaced.options.suffix, None);
    }

    #[test]
    fn delete_ignores_target() {
        let config = OperationConfig::new(
            "1d",
            FileAction::Delete,
            "/tmp/a",
            Some(PathBuf::from("/tmp/b")),
        );
        assert!(config.target().is_none());
    }

    #[test]
    fn batch_size_is_capped() {
        let settings = BatchSettings {
            max_concurrency: 16,
            pause_ms: 0,
        };
        assert_eq!(settings.batch_size(), 3);
        let settings = BatchSettings {
            max_concurrency: 0,
            pause_ms: 0,
        };
        assert_eq!(settings.batch_size(), 1);
    }

    #[test]
    fn backup_patch_merges_supplied_fields() {
        let mut settings = BackupSettings::default();
        settings.apply(BackupPatch {
            retention_days: Some(7),
            compress_backups: Some(true),
            ..BackupPatch::default()
        });
        assert!(settings.enabled);
        assert_eq!(settings.retention_days, 7);
        assert!(settings.compress_backups);
        assert_eq!(settings.retention(), Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn resolved_anchors_backup_dir_under_install_dir() {
        let mut config = EngineConfig::default();
        config.app.install_dir = PathBuf::from("/opt/depara");
        let resolved = config.resolved();
        assert_eq!(
            resolved.backup.backup_dir,
            PathBuf::from("/opt/depara/backups")
        );
    }
}
