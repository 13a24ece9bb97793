//! Recurring operation definitions and their timers.
//!
//! # Design
//! - One timer task per id. Each tick is spawned separately, so a slow run never delays the
//!   timer of the same or another id.
//! - A per-id run guard skips a tick while the previous run for that id is still going.
//! - `cancel` stops future ticks and raises the soft-cancel flag of a run in flight; the run
//!   itself is never interrupted mid-file.
//! - Timer tasks hold a weak reference and exit once every scheduler handle is gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depara_config::{OperationConfig, OperationPatch, frequency_or_default, validate_operation};
use depara_events::{Event, EventBus};
use depara_fsops::{CancelFlag, ExecutionOutcome, FsOpsResult, FsOpsService};
use depara_runtime::SharedClock;
use depara_telemetry::{Metrics, operation_span};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Executes an operation definition once.
#[async_trait]
pub trait OperationRunner: Send + Sync {
    /// Run `config` under `operation_id`, observing `cancel` between batches.
    async fn run(
        &self,
        operation_id: &str,
        config: &OperationConfig,
        cancel: &CancelFlag,
    ) -> FsOpsResult<ExecutionOutcome>;
}

#[async_trait]
impl OperationRunner for FsOpsService {
    async fn run(
        &self,
        operation_id: &str,
        config: &OperationConfig,
        cancel: &CancelFlag,
    ) -> FsOpsResult<ExecutionOutcome> {
        self.run_operation(operation_id, config, cancel).await
    }
}

/// Definition as reported by `list` and `get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledOperation {
    /// Identifier.
    pub id: String,
    /// Stored definition.
    #[serde(flatten)]
    pub config: OperationConfig,
    /// Whether the timer is live.
    pub active: bool,
    /// Effective tick interval.
    pub interval_ms: u64,
    /// When the definition was first scheduled.
    pub created_at: DateTime<Utc>,
    /// When the definition was last scheduled or edited.
    pub updated_at: DateTime<Utc>,
    /// Start of the most recent run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

struct Entry {
    config: OperationConfig,
    interval: Duration,
    timer: JoinHandle<()>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn view(&self, id: &str) -> ScheduledOperation {
        ScheduledOperation {
            id: id.to_string(),
            config: self.config.clone(),
            active: !self.timer.is_finished(),
            interval_ms: u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_run_at: self.last_run_at,
        }
    }
}

struct Shared {
    entries: Mutex<HashMap<String, Entry>>,
    running: Mutex<HashMap<String, CancelFlag>>,
    runner: Arc<dyn OperationRunner>,
    events: EventBus,
    metrics: Metrics,
    clock: SharedClock,
}

/// Owns recurring operation definitions.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Scheduler dispatching ticks to `runner`.
    #[must_use]
    pub fn new(
        runner: Arc<dyn OperationRunner>,
        events: EventBus,
        metrics: Metrics,
        clock: SharedClock,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                runner,
                events,
                metrics,
                clock,
            }),
        }
    }

    /// Validate and store `config`, replacing any timer already registered under the id.
    /// A missing id is generated. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidRequest`] for a blank id and [`AppError::Config`] when the
    /// definition fails validation.
    pub fn schedule(&self, id: Option<String>, config: OperationConfig) -> AppResult<String> {
        let id = match id {
            Some(id) if id.trim().is_empty() => {
                return Err(AppError::InvalidRequest {
                    field: "id",
                    reason: "blank",
                    value: Some(id),
                });
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };
        validate_operation(&config).map_err(|err| AppError::config("scheduler.schedule", err))?;

        let interval = frequency_or_default(&config.frequency);
        let now = self.shared.clock.now();
        let event = Event::OperationScheduled {
            operation_id: id.clone(),
            action: config.action.as_str().to_string(),
            frequency: config.frequency.clone(),
        };
        let count = {
            let mut entries = self.shared.entries();
            if let Some(previous) = entries.remove(&id) {
                previous.timer.abort();
                debug!(operation_id = %id, "replacing existing schedule");
            }
            let timer = spawn_timer(&self.shared, id.clone(), interval);
            entries.insert(
                id.clone(),
                Entry {
                    config,
                    interval,
                    timer,
                    created_at: now,
                    updated_at: now,
                    last_run_at: None,
                },
            );
            entries.len()
        };

        self.shared.metrics.set_scheduled_operations(count);
        self.shared.events.publish(event);
        info!(
            operation_id = %id,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "operation scheduled"
        );
        Ok(id)
    }

    /// Merge `patch` into the stored definition and restart its timer under the same id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown id and [`AppError::Config`] when the merged
    /// definition fails validation; the existing schedule is untouched in both cases.
    pub fn edit(&self, id: &str, patch: OperationPatch) -> AppResult<ScheduledOperation> {
        let view = {
            let mut entries = self.shared.entries();
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| AppError::not_found(id))?;
            let merged = entry.config.merged(patch);
            validate_operation(&merged).map_err(|err| AppError::config("scheduler.edit", err))?;

            let interval = frequency_or_default(&merged.frequency);
            entry.timer.abort();
            entry.timer = spawn_timer(&self.shared, id.to_string(), interval);
            entry.interval = interval;
            entry.config = merged;
            entry.updated_at = self.shared.clock.now();
            entry.view(id)
        };

        self.shared.events.publish(Event::OperationEdited {
            operation_id: id.to_string(),
        });
        info!(operation_id = %id, interval_ms = view.interval_ms, "operation edited");
        Ok(view)
    }

    /// Stop future ticks and drop the definition. A run in flight is asked to stop between
    /// batches. Unknown ids are ignored. Returns whether a definition was removed.
    pub fn cancel(&self, id: &str) -> bool {
        let (removed, count) = {
            let mut entries = self.shared.entries();
            let removed = entries.remove(id);
            (removed, entries.len())
        };
        let Some(entry) = removed else {
            debug!(operation_id = %id, "cancel for unknown operation ignored");
            return false;
        };
        entry.timer.abort();
        let in_flight = self.shared.running().get(id).cloned();
        if let Some(flag) = in_flight {
            flag.cancel();
            info!(operation_id = %id, "in-flight run asked to stop");
        }

        self.shared.metrics.set_scheduled_operations(count);
        self.shared.events.publish(Event::OperationCancelled {
            operation_id: id.to_string(),
        });
        info!(operation_id = %id, "operation cancelled");
        true
    }

    /// Execute the stored definition immediately. The timer is left alone and the run guard is
    /// not consulted.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown id and [`AppError::FsOps`] when the run
    /// fails.
    pub async fn run_now(&self, id: &str) -> AppResult<ExecutionOutcome> {
        let config = {
            let mut entries = self.shared.entries();
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| AppError::not_found(id))?;
            entry.last_run_at = Some(self.shared.clock.now());
            entry.config.clone()
        };
        info!(operation_id = %id, "running operation now");
        self.shared
            .runner
            .run(id, &config, &CancelFlag::new())
            .instrument(operation_span(id, config.action.as_str()))
            .await
            .map_err(|err| AppError::fsops("scheduler.run_now", err))
    }

    /// Every stored definition, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<ScheduledOperation> {
        let entries = self.shared.entries();
        let mut views: Vec<_> = entries.iter().map(|(id, entry)| entry.view(id)).collect();
        drop(entries);
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Stored definition for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ScheduledOperation> {
        self.shared.entries().get(id).map(|entry| entry.view(id))
    }

    /// Number of stored definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries().len()
    }

    /// Whether nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of definitions whose timer is live.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared
            .entries()
            .values()
            .filter(|entry| !entry.timer.is_finished())
            .count()
    }

    /// Whether a run for `id` is in flight.
    #[must_use]
    pub fn is_running(&self, id: &str) -> bool {
        self.shared.running().contains_key(id)
    }

    /// Abort every timer and ask in-flight runs to stop.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.shared.entries().drain().collect();
        for (_, entry) in &drained {
            entry.timer.abort();
        }
        for flag in self.shared.running().values() {
            flag.cancel();
        }
        self.shared.metrics.set_scheduled_operations(0);
        info!(stopped = drained.len(), "scheduler shut down");
    }
}

impl Shared {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("scheduler entries lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn running(&self) -> MutexGuard<'_, HashMap<String, CancelFlag>> {
        self.running.lock().unwrap_or_else(|poisoned| {
            warn!("scheduler run guard lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    async fn tick(self: Arc<Self>, id: String) {
        let Some(guard) = RunGuard::acquire(&self, &id) else {
            warn!(operation_id = %id, "previous run still in progress; tick skipped");
            self.metrics.inc_scheduler_tick("skipped");
            return;
        };
        let config = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&id) else {
                return;
            };
            entry.last_run_at = Some(self.clock.now());
            entry.config.clone()
        };

        let result = self
            .runner
            .run(&id, &config, &guard.flag)
            .instrument(operation_span(&id, config.action.as_str()))
            .await;
        drop(guard);

        match result {
            Ok(_) => {
                self.metrics.inc_scheduler_tick("ran");
                debug!(operation_id = %id, "scheduled run finished");
            }
            Err(err) => {
                self.metrics.inc_scheduler_tick("failed");
                error!(
                    operation_id = %id,
                    code = err.code(),
                    error = %err,
                    "scheduled run failed; schedule kept"
                );
            }
        }
    }
}

/// Marks an id as running until dropped.
struct RunGuard {
    shared: Arc<Shared>,
    id: String,
    flag: CancelFlag,
}

impl RunGuard {
    fn acquire(shared: &Arc<Shared>, id: &str) -> Option<Self> {
        let mut running = shared.running();
        if running.contains_key(id) {
            return None;
        }
        let flag = CancelFlag::new();
        running.insert(id.to_string(), flag.clone());
        drop(running);
        Some(Self {
            shared: Arc::clone(shared),
            id: id.to_string(),
            flag,
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.shared.running().remove(&self.id);
    }
}

fn spawn_timer(shared: &Arc<Shared>, id: String, period: Duration) -> JoinHandle<()> {
    let weak: Weak<Shared> = Arc::downgrade(shared);
    tokio::spawn(async move {
        let Some(start) = Instant::now().checked_add(period) else {
            error!(operation_id = %id, "interval out of range; timer not started");
            return;
        };
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else {
                break;
            };
            tokio::spawn(shared.tick(id.clone()));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use depara_config::{FileAction, OperationOptions};
    use depara_fsops::FsOpsError;
    use depara_runtime::SystemClock;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct CountingRunner {
        runs: AtomicUsize,
        hold: Duration,
        fail: bool,
        flags: Mutex<Vec<CancelFlag>>,
    }

    #[async_trait]
    impl OperationRunner for CountingRunner {
        async fn run(
            &self,
            _operation_id: &str,
            config: &OperationConfig,
            cancel: &CancelFlag,
        ) -> FsOpsResult<ExecutionOutcome> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.flags.lock().unwrap().push(cancel.clone());
            if !self.hold.is_zero() {
                sleep(self.hold).await;
            }
            if self.fail {
                return Err(FsOpsError::SourceNotFound {
                    path: config.source_path.clone(),
                });
            }
            Ok(ExecutionOutcome::Batch(depara_fsops::BatchSummary {
                operation_id: "x".into(),
                processed: 0,
                errors: 0,
                skipped: 0,
                total: 0,
                cancelled: cancel.is_cancelled(),
                duration_ms: 0,
            }))
        }
    }

    fn scheduler(runner: Arc<CountingRunner>) -> anyhow::Result<(Scheduler, Metrics, EventBus)> {
        let metrics = Metrics::new()?;
        let events = EventBus::with_capacity(64);
        let scheduler = Scheduler::new(
            runner,
            events.clone(),
            metrics.clone(),
            Arc::new(SystemClock),
        );
        Ok((scheduler, metrics, events))
    }

    fn copy_every(frequency: &str) -> OperationConfig {
        OperationConfig::new(
            frequency,
            FileAction::Copy,
            "/tmp/depara-src/a.txt",
            Some(PathBuf::from("/tmp/depara-dst/a.txt")),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn one_second_schedule_ticks_and_cancel_stops_it() -> anyhow::Result<()> {
        let runner = Arc::new(CountingRunner::default());
        let (scheduler, metrics, _) = scheduler(Arc::clone(&runner))?;
        scheduler.schedule(Some("op".into()), copy_every("1s"))?;

        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

        assert!(scheduler.cancel("op"));
        sleep(Duration::from_secs(5)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.get("op").is_none());
        assert_eq!(metrics.snapshot().scheduled_operations, 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_skipped() -> anyhow::Result<()> {
        let runner = Arc::new(CountingRunner {
            hold: Duration::from_millis(2_500),
            ..CountingRunner::default()
        });
        let (scheduler, metrics, _) = scheduler(Arc::clone(&runner))?;
        scheduler.schedule(Some("slow".into()), copy_every("1s"))?;

        sleep(Duration::from_millis(3_600)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().scheduler_ticks_skipped, 2);
        assert!(!scheduler.is_running("slow"));

        sleep(Duration::from_millis(1_000)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
        scheduler.shutdown();
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_raises_the_flag_of_a_run_in_flight() -> anyhow::Result<()> {
        let runner = Arc::new(CountingRunner {
            hold: Duration::from_secs(10),
            ..CountingRunner::default()
        });
        let (scheduler, _, _) = scheduler(Arc::clone(&runner))?;
        scheduler.schedule(Some("batch".into()), copy_every("1s"))?;

        sleep(Duration::from_millis(1_100)).await;
        assert!(scheduler.is_running("batch"));
        scheduler.cancel("batch");
        let flags = runner.flags.lock().unwrap().clone();
        assert_eq!(flags.len(), 1);
        assert!(flags[0].is_cancelled());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn failing_runs_keep_the_schedule() -> anyhow::Result<()> {
        let runner = Arc::new(CountingRunner {
            fail: true,
            ..CountingRunner::default()
        });
        let (scheduler, _, _) = scheduler(Arc::clone(&runner))?;
        scheduler.schedule(Some("flaky".into()), copy_every("1s"))?;

        sleep(Duration::from_millis(3_500)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 3);
        assert!(scheduler.get("flaky").is_some_and(|op| op.active));
        Ok(())
    }

    #[tokio::test]
    async fn edit_merges_and_keeps_the_id() -> anyhow::Result<()> {
        let runner = Arc::new(CountingRunner::default());
        let (scheduler, _, events) = scheduler(runner)?;
        let mut config = copy_every("30s");
        config.name = Some("nightly".into());
        scheduler.schedule(Some("op1".into()), config)?;

        let edited = scheduler.edit(
            "op1",
            OperationPatch {
                frequency: Some("5m".into()),
                options: Some(OperationOptions {
                    overwrite: false,
                    ..OperationOptions::default()
                }),
                ..OperationPatch::default()
            },
        )?;
        assert_eq!(edited.id, "op1");
        assert_eq!(edited.interval_ms, 300_000);
        assert_eq!(edited.config.name.as_deref(), Some("nightly"));
        assert_eq!(edited.config.action, FileAction::Copy);
        assert!(!edited.config.options.overwrite);
        assert!(edited.active);

        let kinds: Vec<_> = events
            .backlog_since(0)
            .iter()
            .map(|envelope| envelope.event.kind())
            .collect();
        assert_eq!(kinds, ["operation_scheduled", "operation_edited"]);
        scheduler.shutdown();
        Ok(())
    }

    #[tokio::test]
    async fn edit_rejects_unknown_ids_and_invalid_merges() -> anyhow::Result<()> {
        let (scheduler, _, _) = scheduler(Arc::new(CountingRunner::default()))?;
        let err = scheduler
            .edit("missing-id", OperationPatch::default())
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));

        scheduler.schedule(Some("op".into()), copy_every("1m"))?;
        let err = scheduler
            .edit(
                "op",
                OperationPatch {
                    target_path: Some(PathBuf::from("/tmp/depara-src/a.txt")),
                    ..OperationPatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
        let stored = scheduler.get("op").expect("still scheduled");
        assert_eq!(
            stored.config.target_path,
            Some(PathBuf::from("/tmp/depara-dst/a.txt"))
        );
        scheduler.shutdown();
        Ok(())
    }

    #[tokio::test]
    async fn schedule_validates_and_defaults_bad_frequencies() -> anyhow::Result<()> {
        let (scheduler, _, _) = scheduler(Arc::new(CountingRunner::default()))?;
        let missing_target =
            OperationConfig::new("1m", FileAction::Move, "/tmp/depara-src/a.txt", None);
        assert!(scheduler.schedule(Some("bad".into()), missing_target).is_err());
        assert!(scheduler.schedule(Some("  ".into()), copy_every("1m")).is_err());

        let id = scheduler.schedule(None, copy_every("every minute"))?;
        let stored = scheduler.get(&id).expect("stored");
        assert_eq!(stored.interval_ms, 60_000);

        let delete = OperationConfig::new("1h", FileAction::Delete, "/tmp/depara-src/a.txt", None);
        scheduler.schedule(Some("del".into()), delete)?;
        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.active_count(), 2);
        scheduler.shutdown();
        assert!(scheduler.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_frequency_runs_on_the_default_interval() -> anyhow::Result<()> {
        let runner = Arc::new(CountingRunner::default());
        let (scheduler, _, _) = scheduler(Arc::clone(&runner))?;
        scheduler.schedule(Some("huge".into()), copy_every("200000000000000d"))?;
        let longest = scheduler.schedule(Some("yearly".into()), copy_every("366d"))?;

        sleep(Duration::from_millis(60_500)).await;
        let huge = scheduler.get("huge").expect("stored");
        assert_eq!(huge.interval_ms, 60_000);
        assert!(huge.active);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

        let yearly = scheduler.get(&longest).expect("stored");
        assert_eq!(yearly.interval_ms, 366 * 86_400 * 1_000);
        assert!(yearly.active);
        scheduler.shutdown();
        Ok(())
    }

    #[tokio::test]
    async fn run_now_reports_unknown_ids_and_leaves_timer_alone() -> anyhow::Result<()> {
        let runner = Arc::new(CountingRunner::default());
        let (scheduler, _, _) = scheduler(Arc::clone(&runner))?;
        assert!(matches!(
            scheduler.run_now("nope").await.unwrap_err(),
            AppError::NotFound { .. }
        ));

        scheduler.schedule(Some("op1".into()), copy_every("30s"))?;
        scheduler.run_now("op1").await?;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        let stored = scheduler.get("op1").expect("stored");
        assert!(stored.active);
        assert!(stored.last_run_at.is_some());
        assert!(!scheduler.cancel("nope"));
        scheduler.shutdown();
        Ok(())
    }
}
