//! Fallback values applied when configuration documents omit a field.
//!
//! # Design
//! - Centralize defaults so serde, the loader, and validation agree.
//! - Keep time-based defaults explicit for auditability.

use std::time::Duration;

/// Interval used when an operation frequency cannot be parsed.
pub const DEFAULT_FREQUENCY: Duration = Duration::from_millis(60_000);
/// Longest accepted operation frequency; anything above is treated as unparseable.
pub const MAX_FREQUENCY: Duration = Duration::from_secs(366 * 86_400);
/// Default number of days a backup is retained.
pub const BACKUP_RETENTION_DAYS: u32 = 30;
/// Default backup directory, resolved against the install directory when relative.
pub const BACKUP_DIR_NAME: &str = "backups";
/// Default cadence of the backup retention sweep.
pub const BACKUP_CLEANUP_INTERVAL: &str = "1d";
/// Hard ceiling on concurrent file operations inside one batch.
pub const MAX_BATCH_CONCURRENCY: usize = 3;
/// Default cool-down between batches, in milliseconds.
pub const BATCH_PAUSE_MS: u64 = 100;
/// Default retention for finished progress snapshots, in seconds.
pub const PROGRESS_RETENTION_SECS: u64 = 3_600;
/// Default log level when neither the file nor `RUST_LOG` set one.
pub const LOG_LEVEL: &str = "info";
