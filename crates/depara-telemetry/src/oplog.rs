//! Lifecycle logging for individual operations.

use std::fmt::Display;
use std::time::Instant;

use tracing::{error, info};

/// Tracks one operation from start to completion and logs each transition with elapsed time.
#[derive(Debug)]
pub struct OperationLog {
    operation_id: String,
    action: &'static str,
    started: Instant,
}

impl OperationLog {
    /// Log the start of an operation and begin timing it.
    #[must_use]
    pub fn start(operation_id: impl Into<String>, action: &'static str, subject: &str) -> Self {
        let operation_id = operation_id.into();
        info!(operation_id = %operation_id, action, subject, "operation started");
        Self {
            operation_id,
            action,
            started: Instant::now(),
        }
    }

    /// Identifier the log was started with.
    #[must_use]
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Milliseconds since [`OperationLog::start`].
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Log successful completion and return the elapsed milliseconds.
    pub fn finish(self, detail: &str) -> u64 {
        let elapsed_ms = self.elapsed_ms();
        info!(
            operation_id = %self.operation_id,
            action = self.action,
            elapsed_ms,
            detail,
            "operation finished"
        );
        elapsed_ms
    }

    /// Log a failure and return the elapsed milliseconds.
    pub fn fail(self, err: &dyn Display) -> u64 {
        let elapsed_ms = self.elapsed_ms();
        error!(
            operation_id = %self.operation_id,
            action = self.action,
            elapsed_ms,
            error = %err,
            "operation failed"
        );
        elapsed_ms
    }
}
