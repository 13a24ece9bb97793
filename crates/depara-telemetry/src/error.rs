//! Error types for telemetry operations.

use prometheus::Error as PrometheusError;
use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised by telemetry helpers.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Installing the tracing subscriber failed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        source: tracing_subscriber::util::TryInitError,
    },
    /// Building a Prometheus collector failed.
    #[error("failed to build metrics collector")]
    MetricsCollector {
        /// Metric identifier tied to the failure.
        name: &'static str,
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// Registering a Prometheus collector failed.
    #[error("failed to register metrics collector")]
    MetricsRegister {
        /// Metric identifier tied to the failure.
        name: &'static str,
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// Encoding Prometheus metrics failed.
    #[error("failed to encode metrics")]
    MetricsEncode {
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// Rendered metrics output was not valid UTF-8.
    #[error("metrics output was not valid utf-8")]
    MetricsUtf8 {
        /// Underlying UTF-8 conversion error.
        source: std::string::FromUtf8Error,
    },
    /// Log format name was not recognised.
    #[error("unsupported log format")]
    UnknownLogFormat {
        /// Value supplied by configuration.
        value: String,
    },
}
