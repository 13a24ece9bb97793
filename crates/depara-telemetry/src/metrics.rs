//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges relevant to scheduled file operations.

use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

const FILE_ACTIONS: [&str; 3] = ["move", "copy", "delete"];

/// Prometheus-backed metrics registry shared across the engine.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    file_operations_total: IntCounterVec,
    batch_files_total: IntCounterVec,
    scheduler_ticks_total: IntCounterVec,
    backups_total: IntCounterVec,
    scheduled_operations: IntGauge,
}

/// Snapshot of selected gauges and counters for status reporting.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Operations currently holding a timer.
    pub scheduled_operations: i64,
    /// Single-file operations that succeeded.
    pub file_operations_ok: u64,
    /// Single-file operations that failed.
    pub file_operations_failed: u64,
    /// Batch files processed successfully.
    pub batch_files_processed: u64,
    /// Batch files that failed.
    pub batch_files_failed: u64,
    /// Scheduler ticks skipped because a run was still in flight.
    pub scheduler_ticks_skipped: u64,
    /// Backups written.
    pub backups_created: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let file_operations_total = counter_vec(
            "file_operations_total",
            "Single-file operations by action and status",
            &["action", "status"],
        )?;
        let batch_files_total = counter_vec(
            "batch_files_total",
            "Files handled by batch runs by status",
            &["status"],
        )?;
        let scheduler_ticks_total = counter_vec(
            "scheduler_ticks_total",
            "Scheduler ticks by outcome",
            &["outcome"],
        )?;
        let backups_total = counter_vec(
            "backups_total",
            "Backup copies attempted by status",
            &["status"],
        )?;
        let scheduled_operations = IntGauge::with_opts(Opts::new(
            "scheduled_operations",
            "Operations currently scheduled",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "scheduled_operations",
            source,
        })?;

        register(&registry, "file_operations_total", &file_operations_total)?;
        register(&registry, "batch_files_total", &batch_files_total)?;
        register(&registry, "scheduler_ticks_total", &scheduler_ticks_total)?;
        register(&registry, "backups_total", &backups_total)?;
        register(&registry, "scheduled_operations", &scheduled_operations)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                file_operations_total,
                batch_files_total,
                scheduler_ticks_total,
                backups_total,
                scheduled_operations,
            }),
        })
    }

    /// Count a single-file operation outcome.
    pub fn inc_file_operation(&self, action: &str, status: &str) {
        self.inner
            .file_operations_total
            .with_label_values(&[action, status])
            .inc();
    }

    /// Count batch files by status (`processed`, `failed`, `skipped`).
    pub fn inc_batch_files(&self, status: &str, count: u64) {
        self.inner
            .batch_files_total
            .with_label_values(&[status])
            .inc_by(count);
    }

    /// Count a scheduler tick outcome (`ran`, `skipped`, `failed`).
    pub fn inc_scheduler_tick(&self, outcome: &str) {
        self.inner
            .scheduler_ticks_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Count a backup attempt.
    pub fn inc_backup(&self, status: &str) {
        self.inner.backups_total.with_label_values(&[status]).inc();
    }

    /// Set the scheduled operation gauge.
    pub fn set_scheduled_operations(&self, count: usize) {
        self.inner
            .scheduled_operations
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            scheduled_operations: inner.scheduled_operations.get(),
            file_operations_ok: sum_status(&inner.file_operations_total, "ok"),
            file_operations_failed: sum_status(&inner.file_operations_total, "failed"),
            batch_files_processed: inner
                .batch_files_total
                .with_label_values(&["processed"])
                .get(),
            batch_files_failed: inner.batch_files_total.with_label_values(&["failed"]).get(),
            scheduler_ticks_skipped: inner
                .scheduler_ticks_total
                .with_label_values(&["skipped"])
                .get(),
            backups_created: inner.backups_total.with_label_values(&["ok"]).get(),
        }
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

fn sum_status(counter: &IntCounterVec, status: &str) -> u64 {
    FILE_ACTIONS
        .iter()
        .map(|action| counter.with_label_values(&[*action, status]).get())
        .sum()
}
