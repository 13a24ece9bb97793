//! Facade over the scheduler and the filesystem service.
//!
//! Every entry point an outer surface (HTTP routes, desktop shell) needs lives here and returns
//! serializable values or an [`AppError`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use depara_config::{
    BackupPatch, BackupSettings, EngineConfig, FileAction, OperationConfig, OperationOptions,
    OperationPatch,
};
use depara_events::{Event, EventBus};
use depara_fsops::{
    BatchRequest, BatchSummary, CancelFlag, ExecutionOutcome, FileDescriptor, FsOpsService,
    ImageQuery, OperationReport,
};
use depara_runtime::{ProgressSnapshot, ProgressStore, SharedClock};
use depara_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{AppError, AppResult};
use crate::scheduler::{OperationRunner, ScheduledOperation, Scheduler};

/// Reply to a successful edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOutcome {
    /// Identifier, unchanged by the edit.
    pub operation_id: String,
    /// Merged definition now in force.
    pub config: OperationConfig,
    /// Always `edited`.
    pub status: String,
}

/// Engine summary returned by [`DeparaCore::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Definitions with a live timer.
    pub scheduled_operations: usize,
    /// Definitions stored, live or not.
    pub total_operations: usize,
    /// Whether deletes are backed up by default.
    pub backup_enabled: bool,
    /// Backup directory.
    pub backup_dir: PathBuf,
    /// Backup retention in days.
    pub retention_days: u32,
}

/// The engine as seen by its callers.
#[derive(Clone)]
pub struct DeparaCore {
    scheduler: Scheduler,
    fsops: FsOpsService,
    events: EventBus,
    metrics: Metrics,
    clock: SharedClock,
}

impl DeparaCore {
    /// Build every component from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Telemetry`] when the metrics registry cannot be built and
    /// [`AppError::FsOps`] when an ignore pattern does not compile.
    pub fn new(config: &EngineConfig, clock: SharedClock) -> AppResult<Self> {
        let metrics = Metrics::new().map_err(|err| AppError::telemetry("metrics.new", err))?;
        let events = EventBus::new();
        let fsops = FsOpsService::from_config(
            config,
            Arc::clone(&clock),
            events.clone(),
            ProgressStore::new(),
            metrics.clone(),
        )
        .map_err(|err| AppError::fsops("fsops.from_config", err))?;
        let runner: Arc<dyn OperationRunner> = Arc::new(fsops.clone());
        Ok(Self::with_parts(fsops, runner, events, metrics, clock))
    }

    /// Assemble from prebuilt parts; `runner` is what scheduled ticks execute.
    #[must_use]
    pub fn with_parts(
        fsops: FsOpsService,
        runner: Arc<dyn OperationRunner>,
        events: EventBus,
        metrics: Metrics,
        clock: SharedClock,
    ) -> Self {
        let scheduler = Scheduler::new(
            runner,
            events.clone(),
            metrics.clone(),
            Arc::clone(&clock),
        );
        Self {
            scheduler,
            fsops,
            events,
            metrics,
            clock,
        }
    }

    /// Scheduler owning the recurring definitions.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Filesystem service.
    #[must_use]
    pub const fn fsops(&self) -> &FsOpsService {
        &self.fsops
    }

    /// Event bus carrying engine transitions.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Metrics registry.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Schedule `config`, generating an id when none is given. Returns the id.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::schedule`].
    pub fn schedule_operation(
        &self,
        id: Option<&str>,
        config: OperationConfig,
    ) -> AppResult<String> {
        self.scheduler.schedule(id.map(str::to_string), config)
    }

    /// Cancel the schedule for `id`; unknown ids are ignored.
    pub fn cancel_scheduled_operation(&self, id: &str) {
        self.scheduler.cancel(id);
    }

    /// Merge `patch` into the definition for `id`.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::edit`].
    pub fn edit_scheduled_operation(
        &self,
        id: &str,
        patch: OperationPatch,
    ) -> AppResult<EditOutcome> {
        let edited = self.scheduler.edit(id, patch)?;
        Ok(EditOutcome {
            operation_id: edited.id,
            config: edited.config,
            status: "edited".to_string(),
        })
    }

    /// Definition for `id`.
    #[must_use]
    pub fn get_scheduled_operation(&self, id: &str) -> Option<ScheduledOperation> {
        self.scheduler.get(id)
    }

    /// All definitions with their `active` flag.
    #[must_use]
    pub fn get_scheduled_operations(&self) -> Vec<ScheduledOperation> {
        self.scheduler.list()
    }

    /// Run the definition for `id` now.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::run_now`].
    pub async fn execute_scheduled_operation_now(&self, id: &str) -> AppResult<ExecutionOutcome> {
        self.scheduler.run_now(id).await
    }

    /// Move one file.
    ///
    /// # Errors
    ///
    /// Wraps the executor error in [`AppError::FsOps`].
    pub async fn move_file(
        &self,
        source: &Path,
        target: &Path,
        options: &OperationOptions,
    ) -> AppResult<OperationReport> {
        self.fsops
            .executor()
            .move_file(source, target, options)
            .await
            .map_err(|err| AppError::fsops("core.move_file", err))
    }

    /// Copy one file.
    ///
    /// # Errors
    ///
    /// Wraps the executor error in [`AppError::FsOps`].
    pub async fn copy_file(
        &self,
        source: &Path,
        target: &Path,
        options: &OperationOptions,
    ) -> AppResult<OperationReport> {
        self.fsops
            .executor()
            .copy_file(source, target, options)
            .await
            .map_err(|err| AppError::fsops("core.copy_file", err))
    }

    /// Delete one file.
    ///
    /// # Errors
    ///
    /// Wraps the executor error in [`AppError::FsOps`].
    pub async fn delete_file(
        &self,
        path: &Path,
        options: &OperationOptions,
    ) -> AppResult<OperationReport> {
        self.fsops
            .executor()
            .delete_file(path, options)
            .await
            .map_err(|err| AppError::fsops("core.delete_file", err))
    }

    /// Start a batch in the background. Progress is readable through
    /// [`DeparaCore::get_progress`]; the handle may be dropped.
    pub fn execute_batch_operation(
        &self,
        id: &str,
        action: FileAction,
        source_dir: &Path,
        target_dir: Option<&Path>,
        options: OperationOptions,
    ) -> JoinHandle<AppResult<BatchSummary>> {
        let fsops = self.fsops.clone();
        let request = BatchRequest {
            operation_id: id.to_string(),
            action,
            source_dir: source_dir.to_path_buf(),
            target_dir: target_dir.map(Path::to_path_buf),
            options,
        };
        info!(operation_id = %id, action = action.as_str(), "batch accepted");
        tokio::spawn(async move {
            let operation_id = request.operation_id.clone();
            fsops
                .run_batch(request, &CancelFlag::new())
                .await
                .map_err(|err| {
                    error!(operation_id = %operation_id, error = %err, "background batch failed");
                    AppError::fsops("core.execute_batch_operation", err)
                })
        })
    }

    /// Latest progress for `id`.
    #[must_use]
    pub fn get_progress(&self, id: &str) -> Option<ProgressSnapshot> {
        self.fsops.progress().get(id)
    }

    /// Progress of every batch still running.
    #[must_use]
    pub fn get_active_operations(&self) -> Vec<ProgressSnapshot> {
        self.fsops.progress().list_active()
    }

    /// Forget the progress snapshot for `id`.
    pub fn clear_progress(&self, id: &str) -> bool {
        self.fsops.progress().clear(id)
    }

    /// Drop terminal snapshots older than `max_age`.
    pub fn sweep_progress(&self, max_age: Duration) -> usize {
        self.fsops
            .progress()
            .sweep_terminal(self.clock.now(), max_age)
    }

    /// Whether `path_or_name` is covered by the ignore rules. `name` defaults to the last path
    /// component.
    #[must_use]
    pub fn should_ignore_file(&self, path_or_name: &str, name: Option<&str>) -> bool {
        let name = name.unwrap_or_else(|| {
            path_or_name
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or(path_or_name)
        });
        self.fsops.should_ignore(name, path_or_name)
    }

    /// Images under `folder`, newest first.
    ///
    /// # Errors
    ///
    /// Wraps the listing error in [`AppError::FsOps`].
    pub async fn list_images_recursive(
        &self,
        folder: &Path,
        query: &ImageQuery,
    ) -> AppResult<Vec<FileDescriptor>> {
        self.fsops
            .list_images(folder, query)
            .await
            .map_err(|err| AppError::fsops("core.list_images_recursive", err))
    }

    /// Merge a partial backup configuration and return the result.
    pub fn update_backup_config(&self, patch: BackupPatch) -> BackupSettings {
        let updated = self.fsops.vault().update(patch);
        self.events.publish(Event::SettingsChanged {
            description: format!(
                "backup enabled={} dir={} retention_days={} compress={}",
                updated.enabled,
                updated.backup_dir.display(),
                updated.retention_days,
                updated.compress_backups
            ),
        });
        updated
    }

    /// Run the backup retention sweep with the configured window.
    ///
    /// # Errors
    ///
    /// Wraps the vault error in [`AppError::FsOps`].
    pub async fn cleanup_backups(&self) -> AppResult<usize> {
        let vault = self.fsops.vault();
        vault
            .cleanup(vault.settings().retention_days)
            .await
            .map_err(|err| AppError::fsops("core.cleanup_backups", err))
    }

    /// Engine summary.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let backup = self.fsops.vault().settings();
        EngineStats {
            scheduled_operations: self.scheduler.active_count(),
            total_operations: self.scheduler.len(),
            backup_enabled: backup.enabled,
            backup_dir: backup.backup_dir,
            retention_days: backup.retention_days,
        }
    }

    /// Stop every timer and ask in-flight runs to stop.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depara_config::{AppSettings, PathSettings};
    use depara_runtime::SystemClock;
    use depara_test_support::TempTree;

    fn core(tree: &TempTree) -> anyhow::Result<DeparaCore> {
        let config = EngineConfig {
            app: AppSettings {
                install_dir: tree.root().to_path_buf(),
                ..AppSettings::default()
            },
            paths: PathSettings {
                allowed_roots: Vec::new(),
                include_default_roots: false,
            },
            backup: BackupSettings {
                backup_dir: tree.path("backups"),
                ..BackupSettings::default()
            },
            ..EngineConfig::default()
        };
        Ok(DeparaCore::new(&config, Arc::new(SystemClock))?)
    }

    #[tokio::test]
    async fn should_ignore_file_derives_the_name() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let core = core(&tree)?;
        assert!(core.should_ignore_file("/data/photos/Thumbs.db", None));
        assert!(core.should_ignore_file(r"C:\data\desktop.ini", None));
        assert!(core.should_ignore_file("/data/x", Some("file.tmp")));
        assert!(!core.should_ignore_file("/data/photos/photo.jpg", None));
        Ok(())
    }

    #[tokio::test]
    async fn backup_updates_show_in_stats_and_events() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let core = core(&tree)?;
        let updated = core.update_backup_config(BackupPatch {
            enabled: Some(false),
            retention_days: Some(7),
            ..BackupPatch::default()
        });
        assert!(!updated.enabled);

        let stats = core.stats();
        assert!(!stats.backup_enabled);
        assert_eq!(stats.retention_days, 7);
        assert_eq!(stats.backup_dir, tree.path("backups"));
        assert_eq!(stats.total_operations, 0);
        assert!(
            core.events()
                .backlog_since(0)
                .iter()
                .any(|envelope| envelope.event.kind() == "settings_changed")
        );
        Ok(())
    }

    #[tokio::test]
    async fn stats_count_scheduled_definitions() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let core = core(&tree)?;
        core.schedule_operation(
            Some("op"),
            OperationConfig::new("1h", FileAction::Delete, tree.path("a.txt"), None),
        )?;
        let stats = core.stats();
        assert_eq!((stats.scheduled_operations, stats.total_operations), (1, 1));
        core.cancel_scheduled_operation("op");
        core.cancel_scheduled_operation("op");
        assert_eq!(core.stats().total_operations, 0);
        Ok(())
    }

    #[tokio::test]
    async fn progress_can_be_cleared() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        tree.write_file("in/a.txt", b"a")?;
        let core = core(&tree)?;
        let summary = core
            .execute_batch_operation(
                "b1",
                FileAction::Copy,
                &tree.path("in"),
                Some(&tree.path("out")),
                OperationOptions::default(),
            )
            .await??;
        assert_eq!(summary.processed, 1);
        assert!(core.get_progress("b1").is_some());
        assert!(core.get_active_operations().is_empty());
        assert_eq!(core.sweep_progress(Duration::hours(1)), 0);
        assert!(core.clear_progress("b1"));
        assert!(core.get_progress("b1").is_none());
        Ok(())
    }
}
