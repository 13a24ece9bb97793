//! Built-in "never touch" rules for sync-tool artifacts, OS metadata and temporary files.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{FsOpsError, FsOpsResult};

/// Resilio/BTSync control files.
pub const SYNC_PATTERNS: &[&str] = &[
    ".sync",
    ".SyncID",
    ".SyncIgnore",
    ".SyncArchive",
    ".SyncTrash",
    "*.!sync",
    "*.bts",
];

/// Operating-system metadata.
pub const OS_PATTERNS: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    ".Trashes",
    ".Spotlight-V100",
    ".fseventsd",
    "$RECYCLE.BIN",
    "._*",
    ".directory",
    ".Trash-*",
];

/// Temporary, lock and build artifacts.
pub const TEMP_PATTERNS: &[&str] = &[
    "*.tmp",
    "*.temp",
    "*.bak",
    "*.swp",
    "*.lock",
    "*~",
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "__pycache__",
    "*.pyc",
    ".cache",
    "*.part",
    "*.crdownload",
];

/// Case-insensitive matcher over the built-in groups plus configured extras.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    wildcards: GlobSet,
    literals: Vec<String>,
}

impl IgnoreMatcher {
    /// Matcher with the built-in groups only.
    ///
    /// # Errors
    ///
    /// Returns [`FsOpsError::Glob`] if a pattern fails to compile.
    pub fn new() -> FsOpsResult<Self> {
        Self::with_extra(&[])
    }

    /// Matcher with the built-in groups followed by `extra` patterns.
    ///
    /// # Errors
    ///
    /// Returns [`FsOpsError::Glob`] if a pattern fails to compile.
    pub fn with_extra(extra: &[String]) -> FsOpsResult<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut literals = Vec::new();
        let builtin = SYNC_PATTERNS
            .iter()
            .chain(OS_PATTERNS)
            .chain(TEMP_PATTERNS)
            .copied();
        for pattern in builtin.chain(extra.iter().map(String::as_str)) {
            if pattern.contains('*') {
                let glob = GlobBuilder::new(&escape_glob(pattern))
                    .case_insensitive(true)
                    .literal_separator(false)
                    .backslash_escape(true)
                    .build()
                    .map_err(|err| FsOpsError::glob("ignore.compile", pattern.to_string(), err))?;
                builder.add(glob);
            } else {
                literals.push(pattern.to_lowercase());
            }
        }
        let wildcards = builder
            .build()
            .map_err(|err| FsOpsError::glob("ignore.build", "<set>".to_string(), err))?;
        Ok(Self {
            wildcards,
            literals,
        })
    }

    /// Whether `name` (the entry's base name) or `full_path` hits an ignore rule.
    #[must_use]
    pub fn should_ignore(&self, name: &str, full_path: &str) -> bool {
        if self.wildcards.is_match(name) || self.wildcards.is_match(full_path) {
            return true;
        }
        let name = name.to_lowercase();
        let full = full_path.replace('\\', "/").to_lowercase();
        self.literals.iter().any(|literal| {
            name == *literal
                || full.contains(&format!("/{literal}/"))
                || full.ends_with(&format!("/{literal}"))
        })
    }

    /// Number of compiled wildcard and literal rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wildcards.len() + self.literals.len()
    }

    /// Whether no rules are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Only `*` is a wildcard here; every other glob metacharacter is taken literally.
fn escape_glob(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        if matches!(ch, '?' | '[' | ']' | '{' | '}' | '\\' | '!') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> IgnoreMatcher {
        IgnoreMatcher::new().unwrap()
    }

    #[test]
    fn builtin_names_are_ignored() {
        let matcher = matcher();
        for name in [".sync", "Thumbs.db", "file.tmp", "archive.bak", ".git"] {
            assert!(matcher.should_ignore(name, &format!("/data/{name}")), "{name}");
        }
        for name in ["report.csv", "photo.jpg"] {
            assert!(!matcher.should_ignore(name, &format!("/data/{name}")), "{name}");
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        let matcher = matcher();
        assert!(matcher.should_ignore("THUMBS.DB", "/x/THUMBS.DB"));
        assert!(matcher.should_ignore("Movie.PART", "/x/Movie.PART"));
        assert!(matcher.should_ignore("song.!SYNC", "/x/song.!SYNC"));
    }

    #[test]
    fn literal_patterns_match_path_segments() {
        let matcher = matcher();
        assert!(matcher.should_ignore("config", "/repo/.git/config"));
        assert!(matcher.should_ignore("index.js", "/app/node_modules/lib/index.js"));
        assert!(!matcher.should_ignore("digits.txt", "/data/.github/digits.txt"));
    }

    #[test]
    fn wildcards_span_the_full_path() {
        let matcher = matcher();
        assert!(matcher.should_ignore("._photo.jpg", "/mnt/usb/._photo.jpg"));
        assert!(matcher.should_ignore("notes~", "/home/me/notes~"));
        assert!(!matcher.should_ignore("notes.txt", "/home/me/notes.txt"));
    }

    #[test]
    fn extra_patterns_extend_the_builtin_groups() -> anyhow::Result<()> {
        let matcher = IgnoreMatcher::with_extra(&["*.log".to_string(), "private".to_string()])?;
        assert!(matcher.should_ignore("app.log", "/var/app.log"));
        assert!(matcher.should_ignore("a.txt", "/srv/private/a.txt"));
        assert!(!matcher.should_ignore("a.txt", "/srv/public/a.txt"));
        assert_eq!(matcher.len(), matcher_len_builtin() + 2);
        Ok(())
    }

    fn matcher_len_builtin() -> usize {
        SYNC_PATTERNS.len() + OS_PATTERNS.len() + TEMP_PATTERNS.len()
    }

    #[test]
    fn should_ignore_is_pure() {
        let matcher = matcher();
        let first = matcher.should_ignore("file.tmp", "/a/file.tmp");
        let second = matcher.should_ignore("file.tmp", "/a/file.tmp");
        assert_eq!(first, second);
    }
}
