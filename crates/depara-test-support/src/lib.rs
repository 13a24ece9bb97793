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

//! Shared test helpers used across unit and integration suites.
//! Layout: fixtures.rs (temporary directory trees with controllable mtimes).

pub mod fixtures;

pub use fixtures::{DAY, TempTree};
