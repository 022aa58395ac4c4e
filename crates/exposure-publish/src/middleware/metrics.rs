//! Publish counters and deferred emission.
//!
//! Handlers never bump a counter directly. They schedule increments into a
//! [`DeferredMetrics`] which is flushed once through
//! [`DeferredMetrics::emit`], after the response has been padded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::ports::outbound::MetricsSink;

/// Every counter the publish surface records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishMetric {
    BadJson,
    BadContentType,
    BodyTooLarge,
    EmptyKeys,
    TooManyKeys,
    VerificationFailed,
    BadRevisionToken,
    BackendUnavailable,
    BackendTimeout,
    PublishSuccess,
    LegacyRequest,
    TravelerRequest,
    RevisionRequest,
    InsertedExposures,
    KeysRejected,
    PaddingFailed,
    Chaff,
    Maintenance,
    StatsServed,
}

impl PublishMetric {
    pub const ALL: [PublishMetric; 19] = [
        Self::BadJson,
        Self::BadContentType,
        Self::BodyTooLarge,
        Self::EmptyKeys,
        Self::TooManyKeys,
        Self::VerificationFailed,
        Self::BadRevisionToken,
        Self::BackendUnavailable,
        Self::BackendTimeout,
        Self::PublishSuccess,
        Self::LegacyRequest,
        Self::TravelerRequest,
        Self::RevisionRequest,
        Self::InsertedExposures,
        Self::KeysRejected,
        Self::PaddingFailed,
        Self::Chaff,
        Self::Maintenance,
        Self::StatsServed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::BadJson => "bad_json",
            Self::BadContentType => "bad_content_type",
            Self::BodyTooLarge => "body_too_large",
            Self::EmptyKeys => "empty_keys",
            Self::TooManyKeys => "too_many_keys",
            Self::VerificationFailed => "verification_failed",
            Self::BadRevisionToken => "bad_revision_token",
            Self::BackendUnavailable => "backend_unavailable",
            Self::BackendTimeout => "backend_timeout",
            Self::PublishSuccess => "publish_success",
            Self::LegacyRequest => "legacy_request",
            Self::TravelerRequest => "traveler_request",
            Self::RevisionRequest => "revision_request",
            Self::InsertedExposures => "inserted_exposures",
            Self::KeysRejected => "keys_rejected",
            Self::PaddingFailed => "padding_failed",
            Self::Chaff => "chaff",
            Self::Maintenance => "maintenance",
            Self::StatsServed => "stats_served",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// In-process counters, one atomic per metric.
#[derive(Debug, Default)]
pub struct PublishMetrics {
    counters: [AtomicU64; PublishMetric::ALL.len()],
}

impl PublishMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: PublishMetric) -> u64 {
        self.counters[metric.index()].load(Ordering::Relaxed)
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = PublishMetric::ALL
            .iter()
            .map(|m| (m.name().to_string(), self.get(*m).into()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl MetricsSink for PublishMetrics {
    fn add(&self, metric: PublishMetric, amount: u64) {
        self.counters[metric.index()].fetch_add(amount, Ordering::Relaxed);
    }
}

/// Prometheus-backed sink.
#[cfg(feature = "metrics")]
#[derive(Clone)]
pub struct PrometheusMetrics {
    events: prometheus::IntCounterVec,
}

#[cfg(feature = "metrics")]
impl PrometheusMetrics {
    /// Create the counter family and register it with `registry`.
    pub fn register(registry: &prometheus::Registry) -> Result<Self, prometheus::Error> {
        let events = prometheus::IntCounterVec::new(
            prometheus::Opts::new("en_publish_events_total", "Publish service events by kind"),
            &["event"],
        )?;
        registry.register(Box::new(events.clone()))?;
        Ok(Self { events })
    }
}

#[cfg(feature = "metrics")]
impl MetricsSink for PrometheusMetrics {
    fn add(&self, metric: PublishMetric, amount: u64) {
        self.events.with_label_values(&[metric.name()]).inc_by(amount);
    }
}

/// Counters scheduled during a request, emitted exactly once.
///
/// Only [`emit`](Self::emit) reaches the sink. A guard dropped without it
/// belongs to a request whose response was never written (client gone,
/// task cancelled) and its counters are discarded.
pub struct DeferredMetrics {
    sink: Arc<dyn MetricsSink>,
    pending: Vec<(PublishMetric, u64)>,
}

impl DeferredMetrics {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            pending: Vec::new(),
        }
    }

    /// Schedule `amount` for `metric`. Zero amounts are dropped.
    pub fn push(&mut self, metric: PublishMetric, amount: u64) {
        if amount > 0 {
            self.pending.push((metric, amount));
        }
    }

    pub fn inc(&mut self, metric: PublishMetric) {
        self.push(metric, 1);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Flush every scheduled counter into the sink.
    pub fn emit(mut self) {
        self.flush();
    }

    fn flush(&mut self) {
        for (metric, amount) in self.pending.drain(..) {
            self.sink.add(metric, amount);
        }
    }
}

impl Drop for DeferredMetrics {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                discarded = self.pending.len(),
                "request abandoned before its response was written"
            );
        }
    }
}

impl std::fmt::Debug for DeferredMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredMetrics")
            .field("pending", &self.pending)
            .finish()
    }
}
