//! Recursive image listing for folder browsing.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{FsOpsError, FsOpsResult};
use crate::guard::{AccessMode, PathGuard};
use crate::ignore::IgnoreMatcher;

/// Extensions listed when the caller supplies none.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];
/// Depth limit applied when the caller supplies none.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// File metadata returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Absolute path.
    pub path: PathBuf,
    /// Base name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified_time: DateTime<Utc>,
    /// Lowercase extension without the dot.
    pub extension: String,
}

/// Listing limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageQuery {
    /// Maximum directory depth below the folder.
    pub max_depth: Option<usize>,
    /// Extensions to admit, with or without the leading dot.
    pub extensions: Option<Vec<String>>,
}

/// Images under `folder`, most recently modified first. Ignored names are excluded and ignored
/// directories are not descended into.
///
/// # Errors
///
/// Guard errors for `folder`, [`FsOpsError::InvalidPath`] when it is not a directory, and
/// [`FsOpsError::Walkdir`] when the folder itself cannot be read.
pub async fn list_images_recursive(
    guard: &PathGuard,
    ignore: &IgnoreMatcher,
    folder: &Path,
    query: &ImageQuery,
) -> FsOpsResult<Vec<FileDescriptor>> {
    let root = guard.resolve(folder, AccessMode::Read).await?;
    if !fs::metadata(&root).await.is_ok_and(|meta| meta.is_dir()) {
        return Err(FsOpsError::InvalidPath {
            path: root,
            reason: "not_a_directory",
        });
    }

    let extensions: Vec<String> = query.extensions.as_ref().map_or_else(
        || DEFAULT_IMAGE_EXTENSIONS.iter().map(ToString::to_string).collect(),
        |list| {
            list.iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect()
        },
    );
    let max_depth = query.max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
    let ignore = ignore.clone();
    let walk_root = root.clone();

    let mut images = tokio::task::spawn_blocking(move || {
        collect_images(&walk_root, max_depth, &extensions, &ignore)
    })
    .await
    .map_err(|err| FsOpsError::io("gallery.list", &root, io::Error::other(err)))??;

    images.sort_by(|a, b| {
        b.modified_time
            .cmp(&a.modified_time)
            .then_with(|| a.path.cmp(&b.path))
    });
    debug!(folder = %root.display(), count = images.len(), "images listed");
    Ok(images)
}

fn collect_images(
    root: &Path,
    max_depth: usize,
    extensions: &[String],
    ignore: &IgnoreMatcher,
) -> FsOpsResult<Vec<FileDescriptor>> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !ignore.should_ignore(&name, &entry.path().to_string_lossy())
        });

    let mut images = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(FsOpsError::walkdir("gallery.list", root, err));
            }
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let extension = entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !extensions.contains(&extension) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "failed to stat image");
                continue;
            }
        };
        let modified_time = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();
        images.push(FileDescriptor {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.into_path(),
            size: meta.len(),
            modified_time,
            extension,
        });
    }
    Ok(images)
}
