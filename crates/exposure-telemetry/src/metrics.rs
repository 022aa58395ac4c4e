//! Prometheus registry ownership and text encoding.
//!
//! The registry is owned by a [`MetricsHandle`] rather than a process-wide
//! static, so each service instance (and each test) registers its collectors
//! into its own registry. Metric names follow `en_<component>_<metric>_<unit>`.

use prometheus::{Encoder, Registry, TextEncoder};

use crate::TelemetryError;

/// Handle to the service's metric registry.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    registry: Registry,
}

impl MetricsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that collectors should be registered with.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode all gathered metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
    }
}
