#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

//! DePara engine wiring: the operation scheduler, the `DeparaCore` facade and process bootstrap.
//!
//! Layout: `scheduler.rs` (recurring timers), `core.rs` (facade over scheduling and file
//! operations), `bootstrap.rs` (configuration, logging, maintenance), `error.rs`.

/// Application bootstrap and maintenance loop.
pub mod bootstrap;
pub mod core;
pub mod error;
pub mod scheduler;

pub use crate::core::{DeparaCore, EditOutcome, EngineStats};
pub use bootstrap::{BootstrapOptions, run_app};
pub use error::{AppError, AppResult, ErrorClass};
pub use scheduler::{OperationRunner, ScheduledOperation, Scheduler};
