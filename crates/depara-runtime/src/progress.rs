//! Last-known progress per batch operation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Percentage recorded when a batch stops on a fatal error.
pub const FAILED_PERCENTAGE: i16 = -1;

/// Point-in-time view of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Operation the snapshot belongs to.
    pub operation_id: String,
    /// Completion in `0..=100`, or `-1` after a fatal error.
    pub percentage: i16,
    /// Files enumerated for the batch.
    pub total: u64,
    /// Human-readable status line.
    pub message: String,
    /// When the snapshot was recorded.
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Snapshot for `completed` of `total` files. An empty batch reports 100.
    #[must_use]
    pub fn from_counts(
        operation_id: impl Into<String>,
        completed: u64,
        total: u64,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            percentage: percentage(completed, total),
            total,
            message: message.into(),
            timestamp,
        }
    }

    /// Snapshot recording a fatal failure.
    #[must_use]
    pub fn failed(
        operation_id: impl Into<String>,
        total: u64,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            percentage: FAILED_PERCENTAGE,
            total,
            message: message.into(),
            timestamp,
        }
    }

    /// Whether the batch is still running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.percentage >= 0 && self.percentage < 100
    }

    /// Whether the batch reached completion or failed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

fn percentage(completed: u64, total: u64) -> i16 {
    if total == 0 {
        return 100;
    }
    let completed = completed.min(total);
    // Rounded half-up integer percentage.
    let pct = (completed * 200 + total) / (total * 2);
    i16::try_from(pct).unwrap_or(100)
}

/// Concurrent map from operation id to its latest snapshot.
#[derive(Debug, Clone, Default)]
pub struct ProgressStore {
    inner: Arc<RwLock<HashMap<String, ProgressSnapshot>>>,
}

impl ProgressStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the snapshot for its operation id.
    pub fn set(&self, snapshot: ProgressSnapshot) {
        debug!(
            operation_id = %snapshot.operation_id,
            percentage = snapshot.percentage,
            "progress updated"
        );
        self.write()
            .insert(snapshot.operation_id.clone(), snapshot);
    }

    /// Latest snapshot for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ProgressSnapshot> {
        self.read().get(id).cloned()
    }

    /// Snapshots whose batch is still running, ordered by operation id.
    #[must_use]
    pub fn list_active(&self) -> Vec<ProgressSnapshot> {
        let mut active: Vec<_> = self
            .read()
            .values()
            .filter(|snapshot| snapshot.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.operation_id.cmp(&b.operation_id));
        active
    }

    /// Forget the snapshot for `id`. Returns whether one existed.
    pub fn clear(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    /// Drop terminal snapshots older than `max_age` relative to `now`.
    /// Returns the number removed.
    pub fn sweep_terminal(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let cutoff = now - max_age;
        let mut guard = self.write();
        let before = guard.len();
        guard.retain(|_, snapshot| snapshot.is_active() || snapshot.timestamp >= cutoff);
        let removed = before - guard.len();
        drop(guard);
        if removed > 0 {
            debug!(removed, "swept terminal progress snapshots");
        }
        removed
    }

    /// Number of tracked operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ProgressSnapshot>> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("progress store lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ProgressSnapshot>> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("progress store lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}
