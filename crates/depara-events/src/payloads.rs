//! Event payload types carried across the engine.

use chrono::{DateTime, Utc};

/// Identifier assigned to each event emitted by the engine.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed domain events surfaced across the system.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A recurring operation was registered.
    OperationScheduled {
        /// Identifier of the scheduled operation.
        operation_id: String,
        /// Action performed on each tick.
        action: String,
        /// Frequency string as supplied by the caller.
        frequency: String,
    },
    /// An existing schedule was merged with a patch and re-registered.
    OperationEdited {
        /// Identifier of the edited operation.
        operation_id: String,
    },
    /// A schedule was removed.
    OperationCancelled {
        /// Identifier of the cancelled operation.
        operation_id: String,
    },
    /// A run started, either from a timer tick or on demand.
    OperationStarted {
        /// Identifier of the operation being run.
        operation_id: String,
        /// Whether the run walks a directory tree.
        batch: bool,
    },
    /// Batch runner reported progress after processing a file.
    BatchProgress {
        /// Identifier of the batch.
        operation_id: String,
        /// Completion percentage, `-1` on fatal error.
        percentage: i16,
        /// Files enumerated for the batch.
        total: u64,
    },
    /// A run finished.
    OperationCompleted {
        /// Identifier of the finished operation.
        operation_id: String,
        /// Files processed successfully.
        processed: u64,
        /// Files that failed.
        errors: u64,
    },
    /// A run failed before producing a result.
    OperationFailed {
        /// Identifier of the failed operation.
        operation_id: String,
        /// Human-readable error detail.
        message: String,
    },
    /// A backup copy was written ahead of a destructive operation.
    BackupCreated {
        /// Original file.
        source: String,
        /// Location of the backup copy.
        backup_path: String,
    },
    /// Retention sweep removed expired backups.
    BackupsPurged {
        /// Number of entries removed.
        removed: u64,
    },
    /// Runtime settings were updated.
    SettingsChanged {
        /// Description of the applied change.
        description: String,
    },
}

impl Event {
    /// Machine-friendly discriminator for consumers filtering the stream.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::OperationScheduled { .. } => "operation_scheduled",
            Self::OperationEdited { .. } => "operation_edited",
            Self::OperationCancelled { .. } => "operation_cancelled",
            Self::OperationStarted { .. } => "operation_started",
            Self::BatchProgress { .. } => "batch_progress",
            Self::OperationCompleted { .. } => "operation_completed",
            Self::OperationFailed { .. } => "operation_failed",
            Self::BackupCreated { .. } => "backup_created",
            Self::BackupsPurged { .. } => "backups_purged",
            Self::SettingsChanged { .. } => "settings_changed",
        }
    }

    /// Operation the event refers to, when it refers to one.
    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Self::OperationScheduled { operation_id, .. }
            | Self::OperationEdited { operation_id }
            | Self::OperationCancelled { operation_id }
            | Self::OperationStarted { operation_id, .. }
            | Self::BatchProgress { operation_id, .. }
            | Self::OperationCompleted { operation_id, .. }
            | Self::OperationFailed { operation_id, .. } => Some(operation_id),
            Self::BackupCreated { .. } | Self::BackupsPurged { .. } | Self::SettingsChanged { .. } => {
                None
            }
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}
