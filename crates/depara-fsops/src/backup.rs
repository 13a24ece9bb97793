//! Timestamped backup copies ahead of destructive operations, plus the retention sweep.
//!
//! # Design
//! - Backups are plain files named `{base}.{tag}.{timestamp}` (optionally `.gz`); the directory
//!   listing is the only index.
//! - Settings sit behind a lock so runtime updates apply to the next backup or sweep.
//! - A failed backup surfaces as [`FsOpsError::BackupFailed`] and callers abort the operation.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use depara_config::{BackupPatch, BackupSettings};
use depara_events::{Event, EventBus};
use depara_runtime::SharedClock;
use depara_telemetry::Metrics;
use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::error::{FsOpsError, FsOpsResult};

/// Writes and expires backup copies.
#[derive(Clone)]
pub struct BackupVault {
    settings: Arc<RwLock<BackupSettings>>,
    clock: SharedClock,
    events: EventBus,
    metrics: Metrics,
}

impl BackupVault {
    /// Vault over the given settings.
    #[must_use]
    pub fn new(
        settings: BackupSettings,
        clock: SharedClock,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
            clock,
            events,
            metrics,
        }
    }

    /// Snapshot of the current settings.
    #[must_use]
    pub fn settings(&self) -> BackupSettings {
        self.read().clone()
    }

    /// Whether deletes are backed up without an explicit `forceBackup`.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.read().enabled
    }

    /// Merge a partial update and return the resulting settings.
    pub fn update(&self, patch: BackupPatch) -> BackupSettings {
        let mut guard = self.write();
        guard.apply(patch);
        let updated = guard.clone();
        drop(guard);
        info!(
            enabled = updated.enabled,
            backup_dir = %updated.backup_dir.display(),
            retention_days = updated.retention_days,
            compress = updated.compress_backups,
            "backup settings updated"
        );
        updated
    }

    /// Create the backup directory and its parents if missing.
    ///
    /// # Errors
    ///
    /// Returns [`FsOpsError::Io`] when the directory cannot be created.
    pub async fn ensure_directory(&self) -> FsOpsResult<PathBuf> {
        let dir = self.read().backup_dir.clone();
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| FsOpsError::io("backup.ensure_directory", &dir, err))?;
        Ok(dir)
    }

    /// Copy `file` into the vault, tagged with the operation about to run.
    ///
    /// # Errors
    ///
    /// Returns [`FsOpsError::BackupFailed`] wrapping the IO error; callers must not proceed
    /// with the destructive step.
    pub async fn backup(&self, file: &Path, tag: &str) -> FsOpsResult<PathBuf> {
        let settings = self.settings();
        let Some(base) = file.file_name() else {
            return Err(FsOpsError::InvalidPath {
                path: file.to_path_buf(),
                reason: "no_file_name",
            });
        };

        let mut name = base.to_os_string();
        name.push(format!(".{tag}.{}", backup_timestamp(self.clock.now())));
        if settings.compress_backups {
            name.push(".gz");
        }
        let destination = settings.backup_dir.join(name);

        let result = match fs::create_dir_all(&settings.backup_dir).await {
            Ok(()) if settings.compress_backups => gzip_copy(file, &destination).await,
            Ok(()) => fs::copy(file, &destination).await.map(|_| ()),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                self.metrics.inc_backup("ok");
                info!(
                    source = %file.display(),
                    backup = %destination.display(),
                    tag,
                    "backup created"
                );
                self.events.publish(Event::BackupCreated {
                    source: file.display().to_string(),
                    backup_path: destination.display().to_string(),
                });
                Ok(destination)
            }
            Err(source) => {
                self.metrics.inc_backup("failed");
                error!(source_path = %file.display(), error = %source, "backup failed");
                Err(FsOpsError::BackupFailed {
                    path: file.to_path_buf(),
                    source,
                })
            }
        }
    }

    /// Delete backups whose modification time is older than `retention_days`.
    /// Per-file failures are logged and skipped. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`FsOpsError::Io`] only when the directory itself cannot be listed.
    pub async fn cleanup(&self, retention_days: u32) -> FsOpsResult<usize> {
        let dir = self.read().backup_dir.clone();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(FsOpsError::io("backup.cleanup.read_dir", &dir, err)),
        };

        let cutoff = self.clock.now() - Duration::days(i64::from(retention_days));
        let mut removed = 0usize;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, dir = %dir.display(), "failed to read backup entry");
                    break;
                }
            };
            let path = entry.path();
            let modified = match entry.metadata().await.and_then(|meta| {
                if meta.is_file() {
                    meta.modified().map(Some)
                } else {
                    Ok(None)
                }
            }) {
                Ok(Some(modified)) => DateTime::<Utc>::from(modified),
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "failed to stat backup");
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %path.display(), "expired backup removed");
                }
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "failed to remove expired backup");
                }
            }
        }

        info!(removed, retention_days, dir = %dir.display(), "backup retention sweep finished");
        if removed > 0 {
            self.events.publish(Event::BackupsPurged {
                removed: removed as u64,
            });
        }
        Ok(removed)
    }

    fn read(&self) -> RwLockReadGuard<'_, BackupSettings> {
        self.settings.read().unwrap_or_else(|poisoned| {
            warn!("backup settings lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, BackupSettings> {
        self.settings.write().unwrap_or_else(|poisoned| {
            warn!("backup settings lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

/// ISO-8601 timestamp with `:` and `.` replaced so it is safe in file names.
#[must_use]
pub fn backup_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

async fn gzip_copy(source: &Path, destination: &Path) -> io::Result<()> {
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut input = File::open(&source)?;
        let output = File::create(&destination)?;
        let mut encoder = GzEncoder::new(output, Compression::default());
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()?.sync_all()
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use depara_runtime::{ManualClock, SystemClock};
    use depara_test_support::{DAY, TempTree};
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn vault(dir: PathBuf, clock: SharedClock) -> anyhow::Result<BackupVault> {
        let settings = BackupSettings {
            backup_dir: dir,
            ..BackupSettings::default()
        };
        Ok(BackupVault::new(
            settings,
            clock,
            EventBus::with_capacity(16),
            Metrics::new()?,
        ))
    }

    #[test]
    fn timestamp_is_filename_safe() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(backup_timestamp(at), "2024-05-06T07-08-09-000Z");
    }

    #[tokio::test]
    async fn backup_copies_bytes_with_tagged_name() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let file = tree.write_file("data/report.csv", b"a,b,c")?;
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        let vault = vault(tree.path("backups"), Arc::new(clock))?;

        let backup = vault.backup(&file, "delete").await?;
        assert_eq!(
            backup,
            tree.path("backups/report.csv.delete.2024-01-02T03-04-05-000Z")
        );
        assert_eq!(std::fs::read(&backup)?, b"a,b,c");
        assert_eq!(std::fs::read(&file)?, b"a,b,c");
        Ok(())
    }

    #[tokio::test]
    async fn compressed_backups_are_gzip() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let file = tree.write_file("notes.txt", b"hello hello hello")?;
        let vault = vault(tree.path("vault"), Arc::new(SystemClock))?;
        vault.update(BackupPatch {
            compress_backups: Some(true),
            ..BackupPatch::default()
        });

        let backup = vault.backup(&file, "move").await?;
        assert!(backup.to_string_lossy().ends_with(".gz"));
        let mut decoded = String::new();
        GzDecoder::new(std::fs::File::open(&backup)?).read_to_string(&mut decoded)?;
        assert_eq!(decoded, "hello hello hello");
        Ok(())
    }

    #[tokio::test]
    async fn missing_source_reports_backup_failed() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let vault = vault(tree.path("backups"), Arc::new(SystemClock))?;
        let err = vault
            .backup(&tree.path("ghost.txt"), "delete")
            .await
            .unwrap_err();
        assert!(matches!(err, FsOpsError::BackupFailed { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn cleanup_honours_retention_window() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let vault = vault(tree.path("backups"), Arc::new(SystemClock))?;
        let expired = tree.write_file("backups/old.txt.delete.x", b"old")?;
        let recent = tree.write_file("backups/new.txt.delete.y", b"new")?;
        TempTree::age(&expired, DAY * 31)?;
        TempTree::age(&recent, DAY * 29)?;

        assert_eq!(vault.cleanup(30).await?, 1);
        assert!(!expired.exists());
        assert!(recent.exists());
        Ok(())
    }

    #[tokio::test]
    async fn cleanup_without_directory_is_noop() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let vault = vault(tree.path("never-created"), Arc::new(SystemClock))?;
        assert_eq!(vault.cleanup(1).await?, 0);
        assert_eq!(vault.ensure_directory().await?, tree.path("never-created"));
        assert!(tree.path("never-created").is_dir());
        Ok(())
    }
}
