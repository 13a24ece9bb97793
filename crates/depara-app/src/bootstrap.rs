use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::DeparaCore;
use crate::error::{AppError, AppResult};
use depara_config::{ConfigLoader, EngineConfig, frequency_or_default};
use depara_runtime::{SharedClock, SystemClock};
use depara_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, record_app_mode};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Inputs collected by the binary before the engine starts.
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    /// JSON configuration document; defaults and environment only when absent.
    pub config_path: Option<PathBuf>,
    /// Level overriding the configured one.
    pub log_level: Option<String>,
}

/// Dependencies required to bootstrap the engine.
pub(crate) struct BootstrapDependencies {
    config: EngineConfig,
    clock: SharedClock,
}

impl BootstrapDependencies {
    /// Load configuration from the optional file and the process environment.
    pub(crate) fn from_options(options: &BootstrapOptions) -> AppResult<Self> {
        let loader = options
            .config_path
            .as_ref()
            .map_or_else(ConfigLoader::new, |path| ConfigLoader::new().with_file(path));
        let mut config = loader
            .load()
            .map_err(|err| AppError::config("config.load", err))?;
        if let Some(level) = &options.log_level {
            config.app.log_level.clone_from(level);
        }
        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
        })
    }
}

/// Entry point for the engine boot sequence. Runs until Ctrl-C.
///
/// # Errors
///
/// Returns an error if configuration, logging or engine construction fails.
pub async fn run_app(options: BootstrapOptions) -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_options(&options)?;
    init_logging(&dependencies.config)?;
    let _context = GlobalContextGuard::new("engine");
    record_app_mode("engine");

    let maintenance_settings = MaintenanceSettings::from_config(&dependencies.config);
    let core = start_engine(dependencies).await?;
    let maintenance = spawn_maintenance_task(core.clone(), &maintenance_settings);

    info!("DePara engine running; press Ctrl-C to stop");
    let signal = tokio::signal::ctrl_c().await;

    maintenance.abort();
    if let Err(err) = maintenance.await
        && !err.is_cancelled()
    {
        warn!(error = %err, "maintenance task join failed");
    }
    core.shutdown();
    signal.map_err(|source| AppError::Io {
        operation: "signal.ctrl_c",
        path: None,
        source,
    })?;
    info!("DePara engine shutdown complete");
    Ok(())
}

/// Build the engine from loaded dependencies and schedule the configured operations.
pub(crate) async fn start_engine(dependencies: BootstrapDependencies) -> AppResult<DeparaCore> {
    let BootstrapDependencies { config, clock } = dependencies;
    let core = DeparaCore::new(&config, clock)?;
    let backup_dir = core
        .fsops()
        .vault()
        .ensure_directory()
        .await
        .map_err(|err| AppError::fsops("backup.ensure_directory", err))?;
    info!(backup_dir = %backup_dir.display(), "backup directory ready");

    let seeded = seed_operations(&core, &config);
    info!(
        seeded,
        declared = config.operations.len(),
        "configured operations scheduled"
    );
    Ok(core)
}

/// Schedule every operation declared in the configuration. Invalid entries are logged and
/// skipped. Returns the number scheduled.
pub(crate) fn seed_operations(core: &DeparaCore, config: &EngineConfig) -> usize {
    let mut scheduled = 0;
    for operation in &config.operations {
        match core.schedule_operation(operation.id.as_deref(), operation.config.clone()) {
            Ok(id) => {
                scheduled += 1;
                info!(operation_id = %id, "seeded operation scheduled");
            }
            Err(err) => {
                error!(
                    operation_id = operation.id.as_deref().unwrap_or("<generated>"),
                    error = %err,
                    "seeded operation rejected"
                );
            }
        }
    }
    scheduled
}

/// Cadence and windows for the periodic housekeeping task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MaintenanceSettings {
    pub(crate) backup_interval: Duration,
    pub(crate) progress_retention: chrono::Duration,
}

impl MaintenanceSettings {
    pub(crate) fn from_config(config: &EngineConfig) -> Self {
        let retention_secs = i64::try_from(config.progress.retention_secs).unwrap_or(i64::MAX);
        Self {
            backup_interval: frequency_or_default(&config.backup.cleanup_interval),
            progress_retention: chrono::Duration::try_seconds(retention_secs)
                .unwrap_or(chrono::Duration::MAX),
        }
    }
}

/// Run the backup retention sweep and the progress sweep on the backup cleanup cadence.
pub(crate) fn spawn_maintenance_task(
    core: DeparaCore,
    settings: &MaintenanceSettings,
) -> JoinHandle<()> {
    let settings = *settings;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + settings.backup_interval,
            settings.backup_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match core.cleanup_backups().await {
                Ok(removed) => info!(removed, "scheduled backup sweep finished"),
                Err(err) => warn!(error = %err, "scheduled backup sweep failed"),
            }
            let swept = core.sweep_progress(settings.progress_retention);
            if swept > 0 {
                info!(swept, "expired progress snapshots removed");
            }
        }
    })
}

fn init_logging(config: &EngineConfig) -> AppResult<()> {
    let format = LogFormat::from_config(config.app.log_format.as_deref())
        .map_err(|err| AppError::telemetry("telemetry.log_format", err))?;
    depara_telemetry::init_logging(&LoggingConfig {
        level: &config.app.log_level,
        format,
        build_sha: option_env!("DEPARA_BUILD_SHA").unwrap_or("dev"),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))
}
