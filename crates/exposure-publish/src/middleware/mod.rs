//! Middleware stack for the publish surface.
//!
//! Layer order on publish routes: Request → Tracing → Chaff → Maintenance → Handler.
//! The stats route skips the chaff layer.

pub mod chaff;
pub mod maintenance;
pub mod metrics;
pub mod tracing;

pub use chaff::{ChaffLayer, LatencyTracker, CHAFF_HEADER};
pub use maintenance::{MaintenanceLayer, MaintenanceSwitch};
#[cfg(feature = "metrics")]
pub use metrics::PrometheusMetrics;
pub use metrics::{DeferredMetrics, PublishMetric, PublishMetrics};
pub use tracing::TracingLayer;
