//! Temporary directory trees for filesystem tests.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Scratch directory removed on drop.
#[derive(Debug)]
pub struct TempTree {
    dir: TempDir,
}

impl TempTree {
    /// Create a fresh tree under the system temp directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("depara-test-")
            .tempdir()
            .context("failed to create temp tree")?;
        Ok(Self { dir })
    }

    /// Root of the tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of `relative` inside the tree.
    #[must_use]
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Write `contents` at `relative`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the file or its parents cannot be written.
    pub fn write_file(&self, relative: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Create a directory (and parents) at `relative`.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn mkdir(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.path(relative);
        fs::create_dir_all(&path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(path)
    }

    /// Read a file inside the tree.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    pub fn read(&self, relative: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = self.path(relative);
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }

    /// Files below `relative`, as sorted `/`-joined paths relative to it.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be walked.
    pub fn files_under(&self, relative: impl AsRef<Path>) -> Result<Vec<String>> {
        let base = self.path(relative);
        let mut files = Vec::new();
        for entry in WalkDir::new(&base) {
            let entry = entry.with_context(|| format!("failed to walk {}", base.display()))?;
            if entry.file_type().is_file() {
                let relative = entry.path().strip_prefix(&base)?;
                let joined = relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push(joined);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Set the modification time of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened or updated.
    pub fn set_mtime(path: impl AsRef<Path>, at: SystemTime) -> Result<()> {
        let path = path.as_ref();
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.set_modified(at)
            .with_context(|| format!("failed to set mtime on {}", path.display()))
    }

    /// Make `path` look `age` old.
    ///
    /// # Errors
    ///
    /// See [`TempTree::set_mtime`].
    pub fn age(path: impl AsRef<Path>, age: Duration) -> Result<()> {
        let at = SystemTime::now()
            .checked_sub(age)
            .context("age exceeds system clock range")?;
        Self::set_mtime(path, at)
    }
}

/// One day, for retention fixtures.
pub const DAY: Duration = Duration::from_secs(86_400);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_list_files() -> Result<()> {
        let tree = TempTree::new()?;
        tree.write_file("a.txt", b"a")?;
        tree.write_file("sub/b.txt", b"bb")?;
        tree.mkdir("empty")?;
        assert_eq!(tree.files_under(".")?, vec!["a.txt", "sub/b.txt"]);
        assert_eq!(tree.read("sub/b.txt")?, b"bb");
        Ok(())
    }

    #[test]
    fn age_moves_mtime_back() -> Result<()> {
        let tree = TempTree::new()?;
        let path = tree.write_file("old.log", b"x")?;
        TempTree::age(&path, DAY * 3)?;
        let modified = fs::metadata(&path)?.modified()?;
        let age = SystemTime::now().duration_since(modified)?;
        assert!(age >= DAY * 2);
        Ok(())
    }
}
