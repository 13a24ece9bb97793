//! Single-file move, copy and delete.
//!
//! # Design
//! - Sources are resolved in read mode; targets are sanitized, their parent tree created, then
//!   resolved in write mode.
//! - Backups run before the destructive step and abort it on failure.
//! - Every call is logged through [`OperationLog`] and counted in metrics.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use depara_config::{FileAction, OperationOptions};
use depara_runtime::SharedClock;
use depara_telemetry::{Metrics, OperationLog};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backup::BackupVault;
use crate::error::{FsOpsError, FsOpsResult};
use crate::guard::{AccessMode, PathGuard};
use crate::naming::apply_naming;

/// Result of a successful single-file operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    /// Always `true`; failures are returned as errors.
    pub success: bool,
    /// Identifier generated for this execution.
    pub operation_id: Uuid,
    /// Action that ran.
    pub action: FileAction,
    /// Resolved source path.
    pub source: PathBuf,
    /// Final destination for move and copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
    /// Size in bytes of the moved/copied result or of the deleted file.
    pub file_size: u64,
    /// Wall time spent.
    pub duration_ms: u64,
    /// Backup written before the operation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

/// Performs single-file operations under a [`PathGuard`].
#[derive(Clone)]
pub struct OperationExecutor {
    guard: Arc<PathGuard>,
    vault: BackupVault,
    clock: SharedClock,
    metrics: Metrics,
}

impl OperationExecutor {
    /// Executor over the given guard and vault.
    #[must_use]
    pub fn new(guard: PathGuard, vault: BackupVault, clock: SharedClock, metrics: Metrics) -> Self {
        Self {
            guard: Arc::new(guard),
            vault,
            clock,
            metrics,
        }
    }

    /// Path guard used for every resolution.
    #[must_use]
    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Backup vault used before destructive steps.
    #[must_use]
    pub const fn vault(&self) -> &BackupVault {
        &self.vault
    }

    /// Clock used for naming and reports.
    #[must_use]
    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }

    /// Dispatch on `action`.
    ///
    /// # Errors
    ///
    /// Returns [`FsOpsError::Validation`] when move/copy lack a target, otherwise the errors of
    /// the dispatched operation.
    pub async fn execute(
        &self,
        action: FileAction,
        source: &Path,
        target: Option<&Path>,
        options: &OperationOptions,
    ) -> FsOpsResult<OperationReport> {
        match (action, target) {
            (FileAction::Move, Some(target)) => self.move_file(source, target, options).await,
            (FileAction::Copy, Some(target)) => self.copy_file(source, target, options).await,
            (FileAction::Delete, _) => self.delete_file(source, options).await,
            (FileAction::Move | FileAction::Copy, None) => {
                Err(FsOpsError::validation("target_path", "missing", None))
            }
        }
    }

    /// Move `source` to `target`, renaming atomically when both sit on one filesystem.
    ///
    /// # Errors
    ///
    /// Guard errors, [`FsOpsError::BackupFailed`] when `backupBeforeMove` is set and the backup
    /// fails, [`FsOpsError::TargetExists`] when overwriting is disabled, and
    /// [`FsOpsError::SourceNotFound`] when the source vanished (including a retried move).
    pub async fn move_file(
        &self,
        source: &Path,
        target: &Path,
        options: &OperationOptions,
    ) -> FsOpsResult<OperationReport> {
        let log = start_log(FileAction::Move, source);
        let result = self.move_inner(source, target, options).await;
        self.finish(FileAction::Move, log, result)
    }

    /// Copy `source` to `target`.
    ///
    /// # Errors
    ///
    /// Guard errors, [`FsOpsError::InvalidPath`] for a directory source,
    /// [`FsOpsError::TargetExists`] when overwriting is disabled, and
    /// [`FsOpsError::SourceNotFound`] when the source vanished.
    pub async fn copy_file(
        &self,
        source: &Path,
        target: &Path,
        options: &OperationOptions,
    ) -> FsOpsResult<OperationReport> {
        let log = start_log(FileAction::Copy, source);
        let result = self.copy_inner(source, target, options).await;
        self.finish(FileAction::Copy, log, result)
    }

    /// Delete `path`, backing it up first when backups are enabled or `forceBackup` is set.
    ///
    /// # Errors
    ///
    /// Guard errors, [`FsOpsError::NotFound`] for a missing file, [`FsOpsError::InvalidPath`]
    /// for a directory, and [`FsOpsError::BackupFailed`] when the backup fails.
    pub async fn delete_file(
        &self,
        path: &Path,
        options: &OperationOptions,
    ) -> FsOpsResult<OperationReport> {
        let log = start_log(FileAction::Delete, path);
        let result = self.delete_inner(path, options).await;
        self.finish(FileAction::Delete, log, result)
    }

    async fn move_inner(
        &self,
        source: &Path,
        target: &Path,
        options: &OperationOptions,
    ) -> FsOpsResult<OperationReport> {
        let source = self
            .guard
            .resolve(source, AccessMode::Read)
            .await
            .map_err(|err| match err {
                FsOpsError::NotFound { path } => FsOpsError::SourceNotFound { path },
                other => other,
            })?;
        let target = self.prepare_target(&source, target, options).await?;

        let backup_path = if options.backup_before_move {
            Some(self.vault.backup(&source, "move").await?)
        } else {
            None
        };

        match fs::rename(&source, &target).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(FsOpsError::SourceNotFound { path: source });
            }
            Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
                debug!(source = %source.display(), "rename crosses devices; copying instead");
                copy_then_remove(&source, &target).await?;
            }
            Err(err) => return Err(FsOpsError::io("move.rename", &source, err)),
        }

        let file_size = stat_len(&target, "move.stat").await?;
        Ok(self.report(FileAction::Move, source, Some(target), file_size, backup_path))
    }

    async fn copy_inner(
        &self,
        source: &Path,
        target: &Path,
        options: &OperationOptions,
    ) -> FsOpsResult<OperationReport> {
        let source = self.guard.resolve(source, AccessMode::Read).await?;
        if fs::metadata(&source).await.is_ok_and(|meta| meta.is_dir()) {
            return Err(FsOpsError::InvalidPath {
                path: source,
                reason: "not_a_file",
            });
        }
        let target = self.prepare_target(&source, target, options).await?;

        match fs::copy(&source, &target).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(FsOpsError::SourceNotFound { path: source });
            }
            Err(err) => return Err(FsOpsError::io("copy.copy", &target, err)),
        }

        let file_size = stat_len(&target, "copy.stat").await?;
        Ok(self.report(FileAction::Copy, source, Some(target), file_size, None))
    }

    async fn delete_inner(
        &self,
        path: &Path,
        options: &OperationOptions,
    ) -> FsOpsResult<OperationReport> {
        let path = self.guard.resolve(path, AccessMode::Write).await?;
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(FsOpsError::NotFound { path });
            }
            Err(err) => return Err(FsOpsError::io("delete.stat", &path, err)),
        };
        if meta.is_dir() {
            return Err(FsOpsError::InvalidPath {
                path,
                reason: "is_directory",
            });
        }

        let backup_path = if self.vault.is_enabled() || options.force_backup {
            Some(self.vault.backup(&path, "delete").await?)
        } else {
            None
        };

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(FsOpsError::SourceNotFound { path });
            }
            Err(err) => return Err(FsOpsError::io("delete.remove", &path, err)),
        }

        Ok(self.report(FileAction::Delete, path, None, meta.len(), backup_path))
    }

    async fn prepare_target(
        &self,
        source: &Path,
        target: &Path,
        options: &OperationOptions,
    ) -> FsOpsResult<PathBuf> {
        let named = apply_naming(target, options, self.clock.now());
        let absolute = self.guard.sanitize(&named)?;
        if absolute == source {
            return Err(FsOpsError::validation(
                "target_path",
                "equals_source",
                Some(absolute.display().to_string()),
            ));
        }
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| FsOpsError::io("target.create_parent", parent, err))?;
        }
        let resolved = self.guard.resolve(&absolute, AccessMode::Write).await?;
        if !options.overwrite && fs::try_exists(&resolved).await.unwrap_or(false) {
            return Err(FsOpsError::TargetExists { path: resolved });
        }
        Ok(resolved)
    }

    fn report(
        &self,
        action: FileAction,
        source: PathBuf,
        target: Option<PathBuf>,
        file_size: u64,
        backup_path: Option<PathBuf>,
    ) -> OperationReport {
        OperationReport {
            success: true,
            operation_id: Uuid::new_v4(),
            action,
            source,
            target,
            file_size,
            duration_ms: 0,
            backup_path,
            completed_at: self.clock.now(),
        }
    }

    fn finish(
        &self,
        action: FileAction,
        log: OperationLog,
        result: FsOpsResult<OperationReport>,
    ) -> FsOpsResult<OperationReport> {
        match result {
            Ok(mut report) => {
                if let Ok(id) = Uuid::parse_str(log.operation_id()) {
                    report.operation_id = id;
                }
                report.duration_ms = log.finish(&report.source.display().to_string());
                self.metrics.inc_file_operation(action.as_str(), "ok");
                Ok(report)
            }
            Err(err) => {
                if let Some(path) = err.path() {
                    warn!(path = %path.display(), code = err.code(), "file operation rejected");
                }
                log.fail(&err);
                self.metrics.inc_file_operation(action.as_str(), "failed");
                Err(err)
            }
        }
    }
}

fn start_log(action: FileAction, subject: &Path) -> OperationLog {
    OperationLog::start(
        Uuid::new_v4().to_string(),
        action.as_str(),
        &subject.display().to_string(),
    )
}

async fn copy_then_remove(source: &Path, target: &Path) -> FsOpsResult<()> {
    match fs::copy(source, target).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(FsOpsError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }
        Err(err) => return Err(FsOpsError::io("move.cross_device_copy", target, err)),
    }
    fs::remove_file(source)
        .await
        .map_err(|err| FsOpsError::io("move.cross_device_remove", source, err))
}

async fn stat_len(path: &Path, operation: &'static str) -> FsOpsResult<u64> {
    fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|err| FsOpsError::io(operation, path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use depara_config::BackupSettings;
    use depara_events::EventBus;
    use depara_runtime::SystemClock;
    use depara_test_support::TempTree;

    fn executor(tree: &TempTree, backups_enabled: bool) -> anyhow::Result<OperationExecutor> {
        let metrics = Metrics::new()?;
        let clock: SharedClock = Arc::new(SystemClock);
        let vault = BackupVault::new(
            BackupSettings {
                enabled: backups_enabled,
                backup_dir: tree.path("backups"),
                ..BackupSettings::default()
            },
            Arc::clone(&clock),
            EventBus::with_capacity(16),
            metrics.clone(),
        );
        Ok(OperationExecutor::new(
            PathGuard::new([tree.root().to_path_buf()]),
            vault,
            clock,
            metrics,
        ))
    }

    #[tokio::test]
    async fn copy_produces_identical_bytes() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let source = tree.write_file("in/a.bin", [7u8; 64])?;
        let executor = executor(&tree, true)?;

        let report = executor
            .copy_file(&source, &tree.path("out/deep/a.bin"), &OperationOptions::default())
            .await?;
        assert!(report.success);
        assert_eq!(report.file_size, 64);
        assert_eq!(tree.read("out/deep/a.bin")?, tree.read("in/a.bin")?);
        Ok(())
    }

    #[tokio::test]
    async fn copy_respects_overwrite_flag() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let source = tree.write_file("a.txt", b"new")?;
        let target = tree.write_file("b.txt", b"old")?;
        let executor = executor(&tree, true)?;
        let options = OperationOptions {
            overwrite: false,
            ..OperationOptions::default()
        };

        let err = executor.copy_file(&source, &target, &options).await.unwrap_err();
        assert!(matches!(err, FsOpsError::TargetExists { .. }));
        assert_eq!(tree.read("b.txt")?, b"old");

        executor
            .copy_file(&source, &target, &OperationOptions::default())
            .await?;
        assert_eq!(tree.read("b.txt")?, b"new");
        Ok(())
    }

    #[tokio::test]
    async fn move_removes_source_and_retry_reports_source_not_found() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let source = tree.write_file("a.txt", b"12345")?;
        let target = tree.path("moved/a.txt");
        let executor = executor(&tree, true)?;

        let report = executor
            .move_file(&source, &target, &OperationOptions::default())
            .await?;
        assert_eq!(report.file_size, 5);
        assert!(!source.exists());
        assert_eq!(tree.read("moved/a.txt")?, b"12345");

        let err = executor
            .move_file(&source, &target, &OperationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FsOpsError::SourceNotFound { ref path } if path.ends_with("a.txt")
        ));
        assert_eq!(err.code(), "source_not_found");
        Ok(())
    }

    #[tokio::test]
    async fn move_with_backup_keeps_a_copy() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let source = tree.write_file("doc.txt", b"doc")?;
        let executor = executor(&tree, false)?;
        let options = OperationOptions {
            backup_before_move: true,
            ..OperationOptions::default()
        };

        let report = executor
            .move_file(&source, &tree.path("archive/doc.txt"), &options)
            .await?;
        let backup = report.backup_path.expect("backup path");
        assert!(backup.starts_with(tree.path("backups")));
        assert_eq!(std::fs::read(backup)?, b"doc");
        Ok(())
    }

    #[tokio::test]
    async fn failed_backup_blocks_delete() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let file = tree.write_file("keep.txt", b"keep")?;
        tree.write_file("backups", b"not a directory")?;
        let executor = executor(&tree, true)?;

        let err = executor
            .delete_file(&file, &OperationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FsOpsError::BackupFailed { .. }));
        assert!(file.exists());
        Ok(())
    }

    #[tokio::test]
    async fn delete_backs_up_only_when_enabled_or_forced() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let executor = executor(&tree, false)?;

        let plain = tree.write_file("plain.txt", b"p")?;
        let report = executor
            .delete_file(&plain, &OperationOptions::default())
            .await?;
        assert!(report.backup_path.is_none());
        assert!(!plain.exists());

        let forced = tree.write_file("forced.txt", b"f")?;
        let options = OperationOptions {
            force_backup: true,
            ..OperationOptions::default()
        };
        let report = executor.delete_file(&forced, &options).await?;
        assert!(report.backup_path.is_some());
        assert_eq!(report.file_size, 1);

        let err = executor
            .delete_file(&forced, &OperationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FsOpsError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn execute_requires_target_for_copy() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let source = tree.write_file("a.txt", b"a")?;
        let executor = executor(&tree, true)?;
        let err = executor
            .execute(FileAction::Copy, &source, None, &OperationOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        Ok(())
    }

    #[tokio::test]
    async fn naming_options_shape_the_target() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let source = tree.write_file("a.txt", b"a")?;
        let executor = executor(&tree, true)?;
        let options = OperationOptions {
            suffix: Some("_v2".into()),
            ..OperationOptions::default()
        };
        let report = executor
            .copy_file(&source, &tree.path("out/a.txt"), &options)
            .await?;
        assert_eq!(report.target, Some(tree.path("out/a_v2.txt")));
        Ok(())
    }

    #[tokio::test]
    async fn unsafe_target_is_rejected_before_touching_disk() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let source = tree.write_file("a.txt", b"a")?;
        let executor = executor(&tree, true)?;
        let target = PathBuf::from(format!("{}/../escape.txt", tree.root().display()));
        let err = executor
            .move_file(&source, &target, &OperationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FsOpsError::UnsafePath { .. }));
        assert!(source.exists());
        Ok(())
    }
}
