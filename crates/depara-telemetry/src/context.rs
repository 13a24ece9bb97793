//! Span helpers for the application and for individual operation runs.
//!
//! # Design
//! - Provides an application-level span guard so top-level spans carry mode/build info.
//! - Operation spans carry the operation id and action so nested file logs inherit them.

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Guard that keeps the application-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    #[must_use]
    /// Enter the application-level tracing span for the lifetime of the guard.
    pub fn new(mode: impl Into<String>) -> Self {
        let mode = mode.into();
        let span: &'static Span = Box::leak(Box::new(
            tracing::info_span!("app", mode = %mode, build_sha = %build_sha()),
        ));
        let guard = span.enter();
        Self { _guard: guard }
    }
}

/// Record the current application mode on the active span.
pub fn record_app_mode(mode: &str) {
    Span::current().record("mode", tracing::field::display(mode));
}

/// Span wrapping a single run of an operation.
#[must_use]
pub fn operation_span(operation_id: &str, action: &str) -> Span {
    tracing::info_span!("operation", operation_id = %operation_id, action = %action)
}
