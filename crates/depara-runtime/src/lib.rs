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

//! In-memory runtime state shared by the batch runner and the scheduler.
//!
//! Nothing here is persisted; a restart starts from an empty store.

pub mod clock;
pub mod progress;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use progress::{ProgressSnapshot, ProgressStore};
