//! # Exposure Telemetry
//!
//! Observability setup for the exposure publish service.
//!
//! ## Components
//!
//! - Structured logs through `tracing-subscriber` (pretty or JSON)
//! - Optional span export over OTLP via OpenTelemetry
//! - A Prometheus registry owned by the service, encoded on demand
//!
//! ## Usage
//!
//! ```rust,ignore
//! use exposure_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let guard = init_telemetry(config).await.expect("Failed to init telemetry");
//!     let registry = guard.metrics().registry();
//! }
//! ```

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::MetricsHandle;
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging, tracing export and the metrics registry.
///
/// Returns a guard that must be held for the lifetime of the application.
/// When dropped, it flushes pending spans.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    if config.service_name.trim().is_empty() {
        return Err(TelemetryError::Config("service name cannot be empty".into()));
    }

    let tracing_guard = tracing_setup::init_tracing(&config).await?;

    Ok(TelemetryGuard {
        _tracing: tracing_guard,
        metrics: MetricsHandle::new(),
    })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    metrics: MetricsHandle,
}

impl TelemetryGuard {
    /// Metrics registry shared with the service.
    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Config("bad".into());
        assert_eq!(err.to_string(), "Invalid configuration: bad");
    }
}
