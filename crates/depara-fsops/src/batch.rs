//! Directory-tree batches with bounded concurrency and progress reporting.
//!
//! # Design
//! - The whole tree is enumerated up front so progress has a stable denominator.
//! - Files run in chunks of at most three; chunk N+1 starts only once chunk N has drained.
//! - Per-file failures become counts and log lines; only a failed enumeration stops the batch.
//! - Cancellation is cooperative and observed between chunks.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use depara_config::{BatchSettings, FileAction, OperationFilters, OperationOptions};
use depara_events::{Event, EventBus};
use depara_runtime::{ProgressSnapshot, ProgressStore};
use depara_telemetry::Metrics;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{FsOpsError, FsOpsResult};
use crate::executor::OperationExecutor;
use crate::guard::AccessMode;
use crate::ignore::IgnoreMatcher;

/// Cooperative cancellation flag shared between a run and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Flag in the "keep going" state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop before its next chunk.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancelFlag::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Inputs for one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    /// Identifier progress is reported under.
    pub operation_id: String,
    /// Action applied to each admitted file.
    pub action: FileAction,
    /// Directory to enumerate.
    pub source_dir: PathBuf,
    /// Destination root for move and copy.
    pub target_dir: Option<PathBuf>,
    /// Options, including the user filters.
    pub options: OperationOptions,
}

/// Counts reported when a batch finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Identifier the batch ran under.
    pub operation_id: String,
    /// Files the action succeeded on.
    pub processed: u64,
    /// Files the action failed on.
    pub errors: u64,
    /// Files passed over by ignore rules, filters or type checks.
    pub skipped: u64,
    /// Entries enumerated.
    pub total: u64,
    /// Whether the run stopped early on request.
    pub cancelled: bool,
    /// Wall time spent.
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Processed,
    Skipped,
    Failed,
}

/// Everything a per-file task needs, shared across the tasks of a run.
struct FileJob {
    executor: OperationExecutor,
    ignore: Arc<IgnoreMatcher>,
    action: FileAction,
    source_root: PathBuf,
    target_root: Option<PathBuf>,
    options: OperationOptions,
    filters: CompiledFilters,
}

struct CompiledFilters {
    extensions: Vec<String>,
    pattern: Option<Regex>,
    min_age: Option<chrono::Duration>,
    min_size: Option<u64>,
}

impl CompiledFilters {
    fn compile(filters: &OperationFilters) -> FsOpsResult<Self> {
        let pattern = filters
            .pattern
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| {
                Regex::new(pattern).map_err(|_| {
                    FsOpsError::validation(
                        "filters.pattern",
                        "invalid_regex",
                        Some(pattern.to_string()),
                    )
                })
            })
            .transpose()?;
        Ok(Self {
            extensions: filters
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
            pattern,
            min_age: filters
                .min_age
                .map(|secs| chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))),
            min_size: filters.min_size,
        })
    }

    fn admits(
        &self,
        path: &Path,
        name: &str,
        size: u64,
        modified: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.extensions.is_empty() {
            let ext = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !self.extensions.contains(&ext) {
                return false;
            }
        }
        if let Some(pattern) = &self.pattern
            && !pattern.is_match(name)
        {
            return false;
        }
        if let Some(min_size) = self.min_size
            && size < min_size
        {
            return false;
        }
        if let Some(min_age) = self.min_age
            && now - modified < min_age
        {
            return false;
        }
        true
    }
}

/// Runs batches through an [`OperationExecutor`].
#[derive(Clone)]
pub struct BatchRunner {
    executor: OperationExecutor,
    ignore: Arc<IgnoreMatcher>,
    progress: ProgressStore,
    events: EventBus,
    metrics: Metrics,
    settings: BatchSettings,
}

impl BatchRunner {
    /// Runner over the shared executor, matcher and progress store.
    #[must_use]
    pub const fn new(
        executor: OperationExecutor,
        ignore: Arc<IgnoreMatcher>,
        progress: ProgressStore,
        events: EventBus,
        metrics: Metrics,
        settings: BatchSettings,
    ) -> Self {
        Self {
            executor,
            ignore,
            progress,
            events,
            metrics,
            settings,
        }
    }

    /// Progress store written by this runner.
    #[must_use]
    pub const fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Process every file under `request.source_dir`.
    ///
    /// # Errors
    ///
    /// Returns guard or validation errors for the request itself, and [`FsOpsError::Walkdir`]
    /// when the source directory cannot be enumerated. Either way the progress store is left
    /// holding a `-1` snapshot.
    pub async fn run(
        &self,
        request: BatchRequest,
        cancel: &CancelFlag,
    ) -> FsOpsResult<BatchSummary> {
        let started = Instant::now();
        let operation_id = request.operation_id.clone();
        let result = self.run_inner(request, cancel, started).await;
        if let Err(err) = &result {
            warn!(operation_id = %operation_id, error = %err, "batch stopped");
            let message = match err.path() {
                Some(path) => format!("{err}: {}", path.display()),
                None => err.to_string(),
            };
            self.progress.set(ProgressSnapshot::failed(
                &operation_id,
                0,
                message,
                self.executor.clock().now(),
            ));
        }
        result
    }

    async fn run_inner(
        &self,
        request: BatchRequest,
        cancel: &CancelFlag,
        started: Instant,
    ) -> FsOpsResult<BatchSummary> {
        let BatchRequest {
            operation_id,
            action,
            source_dir,
            target_dir,
            options,
        } = request;
        let guard = self.executor.guard();
        let source_root = guard.resolve(&source_dir, AccessMode::Read).await?;
        if !fs::metadata(&source_root).await.is_ok_and(|meta| meta.is_dir()) {
            return Err(FsOpsError::InvalidPath {
                path: source_root,
                reason: "not_a_directory",
            });
        }
        let target_root = match (action.requires_target(), target_dir) {
            (true, Some(target)) => Some(guard.sanitize(&target)?),
            (true, None) => return Err(FsOpsError::validation("target_path", "missing", None)),
            (false, _) => None,
        };
        let filters = CompiledFilters::compile(&options.filters)?;

        let files = enumerate(&source_root, Arc::clone(&self.ignore)).await?;
        let total = files.len() as u64;
        info!(
            operation_id = %operation_id,
            action = action.as_str(),
            source = %source_root.display(),
            total,
            "batch enumerated"
        );
        self.record(&operation_id, 0, total, "started");

        let job = Arc::new(FileJob {
            executor: self.executor.clone(),
            ignore: Arc::clone(&self.ignore),
            action,
            source_root,
            target_root,
            options,
            filters,
        });

        let mut summary = BatchSummary {
            operation_id: operation_id.clone(),
            processed: 0,
            errors: 0,
            skipped: 0,
            total,
            cancelled: false,
            duration_ms: 0,
        };
        let mut completed = 0u64;
        let mut percentage = 0i16;
        for (index, chunk) in files.chunks(self.settings.batch_size()).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.pause()).await;
            }
            if cancel.is_cancelled() {
                info!(operation_id = %operation_id, completed, total, "batch cancelled");
                summary.cancelled = true;
                break;
            }

            let mut tasks = JoinSet::new();
            for path in chunk {
                let job = Arc::clone(&job);
                let path = path.clone();
                tasks.spawn(async move { process_file(&job, &path).await });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(FileOutcome::Processed) => summary.processed += 1,
                    Ok(FileOutcome::Skipped) => summary.skipped += 1,
                    Ok(FileOutcome::Failed) => summary.errors += 1,
                    Err(err) => {
                        warn!(operation_id = %operation_id, error = %err, "batch task aborted");
                        summary.errors += 1;
                    }
                }
                completed += 1;
                percentage = self.record(&operation_id, completed, total, "running");
            }
            self.events.publish(Event::BatchProgress {
                operation_id: operation_id.clone(),
                percentage,
                total,
            });
        }

        summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.metrics.inc_batch_files("processed", summary.processed);
        self.metrics.inc_batch_files("failed", summary.errors);
        self.metrics.inc_batch_files("skipped", summary.skipped);

        let message = if summary.cancelled {
            format!(
                "cancelled after {completed} of {total}: {} processed, {} errors",
                summary.processed, summary.errors
            )
        } else {
            format!(
                "completed: {} processed, {} errors, {} skipped",
                summary.processed, summary.errors, summary.skipped
            )
        };
        self.progress.set(ProgressSnapshot::from_counts(
            &operation_id,
            total,
            total,
            message,
            self.executor.clock().now(),
        ));
        info!(
            operation_id = %operation_id,
            processed = summary.processed,
            errors = summary.errors,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            duration_ms = summary.duration_ms,
            "batch finished"
        );
        Ok(summary)
    }

    fn record(&self, operation_id: &str, completed: u64, total: u64, message: &str) -> i16 {
        let snapshot = ProgressSnapshot::from_counts(
            operation_id,
            completed,
            total,
            message,
            self.executor.clock().now(),
        );
        let percentage = snapshot.percentage;
        self.progress.set(snapshot);
        percentage
    }
}

/// Every non-directory entry below `root`. Ignored directories are not descended into;
/// unreadable subtrees are logged and skipped.
async fn enumerate(root: &Path, ignore: Arc<IgnoreMatcher>) -> FsOpsResult<Vec<PathBuf>> {
    let root = root.to_path_buf();
    let walk_root = root.clone();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        let walker = WalkDir::new(&walk_root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                !entry.file_type().is_dir()
                    || !ignore.should_ignore(
                        &entry.file_name().to_string_lossy(),
                        &entry.path().to_string_lossy(),
                    )
            });
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_dir() => {}
                Ok(entry) => files.push(entry.into_path()),
                Err(err) if err.depth() == 0 => {
                    return Err(FsOpsError::walkdir("batch.enumerate", &walk_root, err));
                }
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    warn!(path = %path.display(), error = %err, "skipping unreadable entry");
                }
            }
        }
        files.sort();
        Ok(files)
    })
    .await
    .map_err(|err| FsOpsError::io("batch.enumerate", root, io::Error::other(err)))?
}

async fn process_file(job: &FileJob, path: &Path) -> FileOutcome {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if job.ignore.should_ignore(&name, &path.to_string_lossy()) {
        debug!(path = %path.display(), "ignored");
        return FileOutcome::Skipped;
    }

    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "file vanished before processing");
            return FileOutcome::Failed;
        }
    };
    if !meta.is_file() {
        return FileOutcome::Skipped;
    }
    let modified = meta
        .modified()
        .map_or_else(|_| job.executor.clock().now(), DateTime::<Utc>::from);
    if !job
        .filters
        .admits(path, &name, meta.len(), modified, job.executor.clock().now())
    {
        return FileOutcome::Skipped;
    }

    let result = match (job.action, &job.target_root) {
        (FileAction::Delete, _) => job.executor.delete_file(path, &job.options).await,
        (action, Some(target_root)) => {
            let destination = if job.options.preserve_structure {
                let relative = path.strip_prefix(&job.source_root).unwrap_or(path);
                target_root.join(relative)
            } else {
                target_root.join(&name)
            };
            job.executor
                .execute(action, path, Some(&destination), &job.options)
                .await
        }
        (_, None) => Err(FsOpsError::validation("target_path", "missing", None)),
    };

    match result {
        Ok(_) => FileOutcome::Processed,
        Err(err) => {
            warn!(path = %path.display(), code = err.code(), error = %err, "batch file failed");
            FileOutcome::Failed
        }
    }
}
