//! Entry point tying the guard, executor, batch runner and listings together.
//!
//! # Design
//! - One service per engine; clones share the vault settings, progress store and event bus.
//! - `run_operation` is what a scheduler tick calls: it picks batch or single-file execution
//!   and brackets the run with lifecycle events.

use std::path::Path;
use std::sync::Arc;

use depara_config::{EngineConfig, OperationConfig};
use depara_events::{Event, EventBus};
use depara_runtime::{ProgressStore, SharedClock};
use depara_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::backup::BackupVault;
use crate::batch::{BatchRequest, BatchRunner, BatchSummary, CancelFlag};
use crate::error::FsOpsResult;
use crate::executor::{OperationExecutor, OperationReport};
use crate::gallery::{FileDescriptor, ImageQuery, list_images_recursive};
use crate::guard::PathGuard;
use crate::ignore::IgnoreMatcher;

/// Result of running an operation definition once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// A single file was handled.
    Single(OperationReport),
    /// A directory tree was handled as a batch.
    Batch(BatchSummary),
}

/// Filesystem service shared by the scheduler and direct callers.
#[derive(Clone)]
pub struct FsOpsService {
    executor: OperationExecutor,
    batch: BatchRunner,
    ignore: Arc<IgnoreMatcher>,
    events: EventBus,
}

impl FsOpsService {
    /// Assemble the service from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FsOpsError::Glob`] when an extra ignore pattern does not compile.
    pub fn from_config(
        config: &EngineConfig,
        clock: SharedClock,
        events: EventBus,
        progress: ProgressStore,
        metrics: Metrics,
    ) -> FsOpsResult<Self> {
        let guard = PathGuard::from_settings(&config.paths, &config.app.install_dir);
        let ignore = Arc::new(IgnoreMatcher::with_extra(&config.ignore.extra_patterns)?);
        let vault = BackupVault::new(
            config.backup.clone(),
            Arc::clone(&clock),
            events.clone(),
            metrics.clone(),
        );
        let executor = OperationExecutor::new(guard, vault, clock, metrics.clone());
        let batch = BatchRunner::new(
            executor.clone(),
            Arc::clone(&ignore),
            progress,
            events.clone(),
            metrics,
            config.batch.clone(),
        );
        Ok(Self {
            executor,
            batch,
            ignore,
            events,
        })
    }

    /// Single-file executor.
    #[must_use]
    pub const fn executor(&self) -> &OperationExecutor {
        &self.executor
    }

    /// Backup vault.
    #[must_use]
    pub const fn vault(&self) -> &BackupVault {
        self.executor.vault()
    }

    /// Progress store written by batch runs.
    #[must_use]
    pub const fn progress(&self) -> &ProgressStore {
        self.batch.progress()
    }

    /// Whether an entry is covered by the ignore rules.
    #[must_use]
    pub fn should_ignore(&self, name: &str, full_path: &str) -> bool {
        self.ignore.should_ignore(name, full_path)
    }

    /// Recursive image listing under the path guard and ignore rules.
    ///
    /// # Errors
    ///
    /// See [`list_images_recursive`].
    pub async fn list_images(
        &self,
        folder: &Path,
        query: &ImageQuery,
    ) -> FsOpsResult<Vec<FileDescriptor>> {
        list_images_recursive(self.executor.guard(), &self.ignore, folder, query).await
    }

    /// Run a batch with lifecycle events.
    ///
    /// # Errors
    ///
    /// See [`BatchRunner::run`].
    pub async fn run_batch(
        &self,
        request: BatchRequest,
        cancel: &CancelFlag,
    ) -> FsOpsResult<BatchSummary> {
        let operation_id = request.operation_id.clone();
        self.events.publish(Event::OperationStarted {
            operation_id: operation_id.clone(),
            batch: true,
        });
        let result = self.batch.run(request, cancel).await;
        self.publish_outcome(
            &operation_id,
            result
                .as_ref()
                .map(|summary| (summary.processed, summary.errors)),
        );
        result
    }

    /// Run `config` once: a directory source with `batch` set goes through the batch runner,
    /// anything else through the single-file executor.
    ///
    /// # Errors
    ///
    /// Returns the executor or batch runner error.
    pub async fn run_operation(
        &self,
        operation_id: &str,
        config: &OperationConfig,
        cancel: &CancelFlag,
    ) -> FsOpsResult<ExecutionOutcome> {
        let source_is_dir = fs::metadata(&config.source_path)
            .await
            .is_ok_and(|meta| meta.is_dir());
        if source_is_dir && config.options.batch {
            let request = BatchRequest {
                operation_id: operation_id.to_string(),
                action: config.action,
                source_dir: config.source_path.clone(),
                target_dir: config.target().map(Path::to_path_buf),
                options: config.options.clone(),
            };
            return self.run_batch(request, cancel).await.map(ExecutionOutcome::Batch);
        }

        self.events.publish(Event::OperationStarted {
            operation_id: operation_id.to_string(),
            batch: false,
        });
        let result = self
            .executor
            .execute(
                config.action,
                &config.source_path,
                config.target(),
                &config.options,
            )
            .await;
        self.publish_outcome(operation_id, result.as_ref().map(|_| (1, 0)));
        result.map(ExecutionOutcome::Single)
    }

    fn publish_outcome<E: std::fmt::Display>(
        &self,
        operation_id: &str,
        result: Result<(u64, u64), &E>,
    ) {
        let event = match result {
            Ok((processed, errors)) => Event::OperationCompleted {
                operation_id: operation_id.to_string(),
                processed,
                errors,
            },
            Err(err) => Event::OperationFailed {
                operation_id: operation_id.to_string(),
                message: err.to_string(),
            },
        };
        self.events.publish(event);
    }
}
