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

//! File- and environment-backed configuration for the DePara engine.
//!
//! Layout: `model.rs` (typed engine settings and operation definitions), `validate.rs`
//! (frequency parsing and write-time validation), `loader.rs` (`ConfigLoader`),
//! `defaults.rs` (fallback values).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX};
pub use model::{
    AppSettings, BackupPatch, BackupSettings, BatchSettings, EngineConfig, FileAction,
    IgnoreSettings, OperationConfig, OperationFilters, OperationOptions, OperationPatch,
    PathSettings, ProgressSettings, SeededOperation,
};
pub use validate::{frequency_or_default, parse_frequency, validate_engine_config, validate_operation};
