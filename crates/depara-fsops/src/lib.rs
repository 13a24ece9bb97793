#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

//! Guarded file operations for the DePara engine: path validation, ignore rules, backups,
//! single-file move/copy/delete, directory batches and image listings.
//!
//! Layout: `guard.rs` (`PathGuard`), `ignore.rs` (`IgnoreMatcher`), `backup.rs` (`BackupVault`),
//! `naming.rs` (destination naming), `executor.rs` (`OperationExecutor`), `batch.rs`
//! (`BatchRunner`), `gallery.rs` (image listing), `service.rs` (`FsOpsService`).

pub mod backup;
pub mod batch;
pub mod error;
pub mod executor;
pub mod gallery;
pub mod guard;
pub mod ignore;
pub mod naming;
pub mod service;

pub use backup::{BackupVault, backup_timestamp};
pub use batch::{BatchRequest, BatchRunner, BatchSummary, CancelFlag};
pub use error::{FsOpsError, FsOpsResult};
pub use executor::{OperationExecutor, OperationReport};
pub use gallery::{
    DEFAULT_IMAGE_EXTENSIONS, DEFAULT_MAX_DEPTH, FileDescriptor, ImageQuery, list_images_recursive,
};
pub use guard::{AccessMode, PathGuard, default_roots};
pub use ignore::IgnoreMatcher;
pub use naming::{TIMESTAMP_FORMAT, apply_naming};
pub use service::{ExecutionOutcome, FsOpsService};
