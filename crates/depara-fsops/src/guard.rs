//! Path validation against an allow-list of base directories.
//!
//! # Design
//! - Reject traversal and expansion sequences on the raw input before touching the disk.
//! - Absolutise lexically; the allow-list check never follows symlinks.
//! - Mode checks only `stat`; nothing is created here.

use std::io;
use std::path::{Path, PathBuf};

use depara_config::PathSettings;
use tokio::fs;
use tracing::debug;

use crate::error::{FsOpsError, FsOpsResult};

/// Fixed system locations operations may touch.
const SYSTEM_ROOTS: &[&str] = &["/usr/local", "/opt", "/var", "/tmp", "/media", "/mnt"];
/// Conventional parents of user home directories.
const HOME_PARENTS: &[&str] = &["/home", "/Users", "/root"];

/// How a resolved path is going to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Path must exist and be a regular file or directory.
    Read,
    /// Path may exist; otherwise its parent must be an existing directory.
    Write,
    /// Same checks as [`AccessMode::Write`] for paths about to be created.
    Create,
}

/// Validates paths against the configured base directories.
#[derive(Debug, Clone)]
pub struct PathGuard {
    roots: Vec<PathBuf>,
}

impl PathGuard {
    /// Guard admitting only the given roots.
    #[must_use]
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let roots = roots
            .into_iter()
            .map(|root| std::path::absolute(&root).unwrap_or(root))
            .collect();
        Self { roots }
    }

    /// Guard built from configuration: defaults (unless disabled), the install directory and
    /// any extra roots.
    #[must_use]
    pub fn from_settings(settings: &PathSettings, install_dir: &Path) -> Self {
        let mut roots = Vec::new();
        if settings.include_default_roots {
            roots.extend(default_roots());
        }
        roots.push(install_dir.to_path_buf());
        roots.extend(settings.allowed_roots.iter().cloned());
        Self::new(roots)
    }

    /// Roots currently admitted.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Lexical validation: reject unsafe input, absolutise, and enforce the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`FsOpsError::UnsafePath`] for `..`, `~` or `$` anywhere in the input and
    /// [`FsOpsError::AccessDenied`] when the absolute path is outside every root.
    pub fn sanitize(&self, path: &Path) -> FsOpsResult<PathBuf> {
        let raw = path.to_string_lossy();
        if let Some(reason) = unsafe_sequence(&raw) {
            return Err(FsOpsError::UnsafePath {
                input: raw.into_owned(),
                reason,
            });
        }
        if raw.trim().is_empty() {
            return Err(FsOpsError::validation("path", "empty", None));
        }

        let absolute =
            std::path::absolute(path).map_err(|err| FsOpsError::io("guard.absolute", path, err))?;
        if self.is_allowed(&absolute) {
            Ok(absolute)
        } else {
            Err(FsOpsError::AccessDenied { path: absolute })
        }
    }

    /// Full resolution: [`PathGuard::sanitize`] plus the existence checks for `mode`.
    ///
    /// # Errors
    ///
    /// In addition to the sanitize errors: [`FsOpsError::NotFound`] or
    /// [`FsOpsError::InvalidPath`] in read mode, [`FsOpsError::ParentNotAccessible`] in
    /// write/create mode.
    pub async fn resolve(&self, path: &Path, mode: AccessMode) -> FsOpsResult<PathBuf> {
        let absolute = self.sanitize(path)?;
        match mode {
            AccessMode::Read => {
                let meta = match fs::metadata(&absolute).await {
                    Ok(meta) => meta,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        return Err(FsOpsError::NotFound { path: absolute });
                    }
                    Err(err) => return Err(FsOpsError::io("guard.stat", absolute, err)),
                };
                if !meta.is_file() && !meta.is_dir() {
                    return Err(FsOpsError::InvalidPath {
                        path: absolute,
                        reason: "not_file_or_directory",
                    });
                }
            }
            AccessMode::Write | AccessMode::Create => {
                if fs::symlink_metadata(&absolute).await.is_err() {
                    let parent_is_dir = match absolute.parent() {
                        Some(parent) => fs::metadata(parent)
                            .await
                            .is_ok_and(|meta| meta.is_dir()),
                        None => false,
                    };
                    if !parent_is_dir {
                        return Err(FsOpsError::ParentNotAccessible { path: absolute });
                    }
                }
            }
        }
        debug!(path = %absolute.display(), ?mode, "path resolved");
        Ok(absolute)
    }

    fn is_allowed(&self, absolute: &Path) -> bool {
        is_windows_drive_path(absolute) || self.roots.iter().any(|root| absolute.starts_with(root))
    }
}

fn unsafe_sequence(raw: &str) -> Option<&'static str> {
    if raw.contains("..") {
        Some("parent_traversal")
    } else if raw.contains('~') {
        Some("home_expansion")
    } else if raw.contains('$') {
        Some("variable_expansion")
    } else {
        None
    }
}

/// Home directory of the current user plus the conventional home parents and system roots.
#[must_use]
pub fn default_roots() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = SYSTEM_ROOTS
        .iter()
        .chain(HOME_PARENTS)
        .map(PathBuf::from)
        .collect();
    for var in ["HOME", "USERPROFILE"] {
        if let Some(home) = std::env::var_os(var).filter(|value| !value.is_empty()) {
            roots.push(PathBuf::from(home));
        }
    }
    roots
}

#[cfg(windows)]
fn is_windows_drive_path(path: &Path) -> bool {
    use std::path::{Component, Prefix};
    matches!(
        path.components().next(),
        Some(Component::Prefix(prefix)) if matches!(prefix.kind(), Prefix::Disk(_) | Prefix::VerbatimDisk(_))
    )
}

#[cfg(not(windows))]
const fn is_windows_drive_path(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use depara_test_support::TempTree;

    fn guard_for(tree: &TempTree) -> PathGuard {
        PathGuard::new([tree.root().to_path_buf()])
    }

    #[tokio::test]
    async fn unsafe_sequences_fail_in_every_mode() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let guard = guard_for(&tree);
        let base = tree.root().display().to_string();
        for input in [
            format!("{base}/../etc/passwd"),
            "~/secrets".to_string(),
            format!("{base}/$HOME/x"),
            format!("{base}/a..b"),
        ] {
            for mode in [AccessMode::Read, AccessMode::Write, AccessMode::Create] {
                let err = guard.resolve(Path::new(&input), mode).await.unwrap_err();
                assert!(matches!(err, FsOpsError::UnsafePath { .. }), "{input} {mode:?}");
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn paths_outside_roots_are_denied() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let other = TempTree::new()?;
        let guard = guard_for(&tree);
        let err = guard
            .resolve(&other.path("file.txt"), AccessMode::Write)
            .await
            .unwrap_err();
        assert!(matches!(err, FsOpsError::AccessDenied { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn read_mode_requires_existing_path() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let guard = guard_for(&tree);
        let file = tree.write_file("a.txt", b"a")?;

        assert_eq!(guard.resolve(&file, AccessMode::Read).await?, file);
        assert_eq!(
            guard.resolve(tree.root(), AccessMode::Read).await?,
            tree.root()
        );
        let err = guard
            .resolve(&tree.path("missing.txt"), AccessMode::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, FsOpsError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn write_mode_requires_parent_directory() -> anyhow::Result<()> {
        let tree = TempTree::new()?;
        let guard = guard_for(&tree);
        tree.write_file("plain", b"x")?;

        assert!(guard.resolve(&tree.path("new.txt"), AccessMode::Write).await.is_ok());
        let err = guard
            .resolve(&tree.path("nested/new.txt"), AccessMode::Create)
            .await
            .unwrap_err();
        assert!(matches!(err, FsOpsError::ParentNotAccessible { .. }));
        let err = guard
            .resolve(&tree.path("plain/child.txt"), AccessMode::Write)
            .await
            .unwrap_err();
        assert!(matches!(err, FsOpsError::ParentNotAccessible { .. }));
        Ok(())
    }

    #[test]
    fn settings_control_default_roots() {
        let settings = PathSettings {
            allowed_roots: vec![PathBuf::from("/srv/data")],
            include_default_roots: false,
        };
        let guard = PathGuard::from_settings(&settings, Path::new("/opt/depara"));
        assert_eq!(
            guard.roots(),
            &[PathBuf::from("/opt/depara"), PathBuf::from("/srv/data")]
        );
        assert!(guard.sanitize(Path::new("/srv/data/in/file")).is_ok());
        assert!(matches!(
            guard.sanitize(Path::new("/etc/passwd")),
            Err(FsOpsError::AccessDenied { .. })
        ));

        let defaults = PathGuard::from_settings(&PathSettings::default(), Path::new("/srv/app"));
        assert!(defaults.sanitize(Path::new("/tmp/x")).is_ok());
        assert!(defaults.sanitize(Path::new("/mnt/usb/x")).is_ok());
    }
}
