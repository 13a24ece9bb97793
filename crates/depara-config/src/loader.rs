//! Configuration loader: JSON document first, environment overrides second.
//!
//! # Design
//! - The file is optional; a missing path yields defaults.
//! - Environment lookups go through an injectable function so tests never touch process state.
//! - The merged document is resolved and validated before it is handed out.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::EngineConfig;
use crate::validate::validate_engine_config;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "DEPARA_";

/// Loads [`EngineConfig`] from an optional JSON file plus `DEPARA_*` environment overrides.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Loader that starts from defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self { path: None }
    }

    /// Read the given JSON document before applying overrides.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Load using the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, an override is malformed,
    /// or the merged document fails validation.
    pub fn load(&self) -> ConfigResult<EngineConfig> {
        self.load_with_env(|name| std::env::var(name).ok())
    }

    /// Load using a custom environment lookup.
    ///
    /// # Errors
    ///
    /// See [`ConfigLoader::load`].
    pub fn load_with_env<F>(&self, lookup: F) -> ConfigResult<EngineConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.path {
            Some(path) => read_document(path)?,
            None => EngineConfig::default(),
        };
        apply_env_overrides(&mut config, &lookup)?;
        let config = config.resolved();
        validate_engine_config(&config)?;
        info!(
            install_dir = %config.app.install_dir.display(),
            backup_dir = %config.backup.backup_dir.display(),
            operations = config.operations.len(),
            "configuration loaded"
        );
        Ok(config)
    }
}

fn read_document(path: &Path) -> ConfigResult<EngineConfig> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        operation: "config.read",
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), bytes = raw.len(), "read configuration document");
    serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        operation: "config.parse",
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides<F>(config: &mut EngineConfig, lookup: &F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = env_value(lookup, "INSTALL_DIR") {
        config.app.install_dir = PathBuf::from(dir);
    }
    if let Some(level) = env_value(lookup, "LOG_LEVEL") {
        config.app.log_level = level;
    }
    if let Some(format) = env_value(lookup, "LOG_FORMAT") {
        config.app.log_format = Some(format);
    }
    if let Some(dir) = env_value(lookup, "BACKUP_DIR") {
        config.backup.backup_dir = PathBuf::from(dir);
    }
    if let Some(enabled) = env_parse::<bool, _>(lookup, "BACKUP_ENABLED")? {
        config.backup.enabled = enabled;
    }
    if let Some(days) = env_parse::<u32, _>(lookup, "RETENTION_DAYS")? {
        config.backup.retention_days = days;
    }
    if let Some(concurrency) = env_parse::<usize, _>(lookup, "MAX_CONCURRENCY")? {
        config.batch.max_concurrency = concurrency;
    }
    Ok(())
}

fn env_value<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(&format!("{ENV_PREFIX}{key}")).filter(|value| !value.trim().is_empty())
}

fn env_parse<T, F>(lookup: &F, key: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    env_value(lookup, key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnv {
                name: format!("{ENV_PREFIX}{key}"),
                value: raw.clone(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileAction;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_load_without_file() -> anyhow::Result<()> {
        let config = ConfigLoader::new().load_with_env(env(&[]))?;
        assert!(config.backup.enabled);
        assert_eq!(config.backup.retention_days, 30);
        assert!(config.app.install_dir.is_absolute());
        assert!(config.backup.backup_dir.starts_with(&config.app.install_dir));
        Ok(())
    }

    #[test]
    fn file_values_are_overridden_by_env() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("depara.json");
        fs::write(
            &path,
            serde_json::json!({
                "app": { "install_dir": temp.path() },
                "backup": { "retention_days": 5, "compress_backups": true },
                "operations": [{
                    "id": "nightly",
                    "frequency": "1d",
                    "action": "copy",
                    "sourcePath": "/tmp/in",
                    "targetPath": "/tmp/out"
                }]
            })
            .to_string(),
        )?;

        let config = ConfigLoader::new()
            .with_file(&path)
            .load_with_env(env(&[("DEPARA_RETENTION_DAYS", "9")]))?;
        assert_eq!(config.backup.retention_days, 9);
        assert!(config.backup.compress_backups);
        assert_eq!(config.backup.backup_dir, temp.path().join("backups"));
        assert_eq!(config.operations.len(), 1);
        assert_eq!(config.operations[0].id.as_deref(), Some("nightly"));
        assert_eq!(config.operations[0].config.action, FileAction::Copy);
        Ok(())
    }

    #[test]
    fn malformed_env_override_is_rejected() {
        let err = ConfigLoader::new()
            .load_with_env(env(&[("DEPARA_BACKUP_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn missing_file_reports_io_error() {
        let err = ConfigLoader::new()
            .with_file("/definitely/not/here.json")
            .load_with_env(env(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn invalid_seeded_operation_fails_validation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("depara.json");
        fs::write(
            &path,
            r#"{"operations":[{"frequency":"1m","action":"move","sourcePath":"/tmp/a"}]}"#,
        )?;
        let err = ConfigLoader::new()
            .with_file(&path)
            .load_with_env(env(&[]))
            .unwrap_err();
        assert_eq!(err.field(), Some("target_path"));
        Ok(())
    }
}
