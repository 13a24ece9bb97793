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

//! Telemetry primitives shared across the DePara workspace.
//!
//! This crate centralises logging, operation lifecycle logs, and metrics so the
//! engine and its binary adopt a consistent observability story.

pub mod context;
pub mod error;
pub mod init;
pub mod metrics;
pub mod oplog;

pub use context::{GlobalContextGuard, operation_span, record_app_mode};
pub use error::{Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
pub use oplog::OperationLog;
