//! Destination naming: optional suffix and timestamp inserted before the extension.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use depara_config::OperationOptions;

/// Timestamp layout inserted by `addTimestamp`.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Apply the naming options to the file name of `target`.
///
/// The result is `{stem}{suffix}_{timestamp}.{ext}`; either part is omitted when not configured.
#[must_use]
pub fn apply_naming(target: &Path, options: &OperationOptions, now: DateTime<Utc>) -> PathBuf {
    let suffix = options.suffix.as_deref().filter(|suffix| !suffix.is_empty());
    if suffix.is_none() && !options.add_timestamp {
        return target.to_path_buf();
    }
    let Some(stem) = target.file_stem() else {
        return target.to_path_buf();
    };

    let mut name = stem.to_os_string();
    if let Some(suffix) = suffix {
        name.push(suffix);
    }
    if options.add_timestamp {
        name.push("_");
        name.push(now.format(TIMESTAMP_FORMAT).to_string());
    }
    if let Some(ext) = target.extension() {
        name.push(".");
        name.push(ext);
    }
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn untouched_without_options() {
        let options = OperationOptions::default();
        assert_eq!(
            apply_naming(Path::new("/out/a.txt"), &options, now()),
            PathBuf::from("/out/a.txt")
        );
    }

    #[test]
    fn suffix_and_timestamp_precede_extension() {
        let options = OperationOptions {
            add_timestamp: true,
            suffix: Some("-copy".into()),
            ..OperationOptions::default()
        };
        assert_eq!(
            apply_naming(Path::new("/out/report.final.pdf"), &options, now()),
            PathBuf::from("/out/report.final-copy_20240309-140507.pdf")
        );
        assert_eq!(
            apply_naming(Path::new("/out/README"), &options, now()),
            PathBuf::from("/out/README-copy_20240309-140507")
        );
    }

    #[test]
    fn timestamp_only() {
        let options = OperationOptions {
            add_timestamp: true,
            ..OperationOptions::default()
        };
        assert_eq!(
            apply_naming(Path::new("photo.jpg"), &options, now()),
            PathBuf::from("photo_20240309-140507.jpg")
        );
    }
}
