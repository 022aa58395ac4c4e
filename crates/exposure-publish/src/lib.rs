// Allow missing docs for internal items
#![allow(missing_docs)]

//! Exposure Publish - diagnosis key ingestion for exposure notification apps.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        EXPOSURE PUBLISH                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │  POST /v1/publish     POST /        POST /v1/stats  GET /health │
//! │        │                │                 │                   │
//! │  ┌─────┴────────────────┴─────┐           │                   │
//! │  │  Tracing → Chaff           │           │                   │
//! │  │          → Maintenance     │  Maintenance                  │
//! │  └─────┬────────────────┬─────┘           │                   │
//! │        │       upconvert│ (v1alpha1)      │                   │
//! │  ┌─────┴────────────────┴─────────────────┴─────┐             │
//! │  │              Publish Processor               │             │
//! │  │  shape → verify → resolve → upsert → issue   │             │
//! │  └─────┬──────────────┬──────────────┬──────────┘             │
//! │        │              │              │                        │
//! │  AuthorityVerifier  RevisionTokens  ExposureStore              │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every response, including errors, decoys and maintenance replies, carries
//! random-length padding. Metrics are scheduled during processing and emitted
//! once, after padding.
//!
//! # Usage
//!
//! ```ignore
//! use exposure_publish::{Collaborators, PublishConfig, PublishService};
//!
//! let service = PublishService::new(config, collaborators)?;
//! service.serve(exposure_publish::shutdown_signal()).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod api;
pub mod domain;
pub mod middleware;
pub mod ports;
pub mod processor;
pub mod router;
pub mod service;

// Re-exports for public API
pub use api::{ApiVersion, PublishEnvelope, PublishReply, Surface, VersionBridge, HEADER_API_VERSION};
pub use domain::config::{ConfigError, PublishConfig};
pub use domain::error::{PublishError, ServerError};
pub use domain::padding::{generate_padding, Padding, ResponsePadder};
pub use domain::types::*;
pub use middleware::{DeferredMetrics, MaintenanceSwitch, PublishMetric, PublishMetrics, CHAFF_HEADER};
#[cfg(feature = "metrics")]
pub use middleware::PrometheusMetrics;
pub use ports::outbound::{
    AuthorityVerifier, ExposureStore, MetricsSink, RevisionTokens, SystemTimeSource, TimeSource,
};
pub use processor::{Outcome, PublishProcessor};
pub use service::{shutdown_signal, Collaborators, PublishService};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
