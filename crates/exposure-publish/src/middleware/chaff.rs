//! Chaff detection and decoy responses.
//!
//! Clients send decoy publish requests, marked with the `X-Chaff` header, so
//! that an observer cannot tell which devices are reporting a diagnosis. The
//! layer answers them without touching the inner service. Decoy replies are
//! delayed by the mean latency of recent genuine requests so response timing
//! gives nothing away either. Their stand-in revision token has the size and
//! alphabet of a real one, so with padding applied the body length range of a
//! decoy matches that of a genuine publish.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::{body::Body, http::Request, response::Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tower::{Layer, Service};
use tracing::debug;

use super::metrics::{DeferredMetrics, PublishMetric};
use crate::api::Surface;
use crate::domain::padding::ResponsePadder;
use crate::domain::types::REVISION_TOKEN_BYTES;
use crate::ports::outbound::MetricsSink;

/// Request header that marks decoy traffic. Any value counts.
pub const CHAFF_HEADER: &str = "x-chaff";

/// Bounded window of genuine request latencies.
#[derive(Debug)]
pub struct LatencyTracker {
    window: Mutex<VecDeque<Duration>>,
    capacity: usize,
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, latency: Duration) {
        let mut window = self.window.lock();
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(latency);
    }

    /// Mean of the window, zero when nothing has been recorded.
    pub fn mean(&self) -> Duration {
        let window = self.window.lock();
        if window.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = window.iter().sum();
        total / window.len() as u32
    }
}

/// Layer that answers chaff requests itself.
#[derive(Clone)]
pub struct ChaffLayer {
    surface: Surface,
    padder: ResponsePadder,
    metrics: Arc<dyn MetricsSink>,
    tracker: Arc<LatencyTracker>,
    max_delay: Duration,
}

impl ChaffLayer {
    pub fn new(
        surface: Surface,
        padder: ResponsePadder,
        metrics: Arc<dyn MetricsSink>,
        tracker: Arc<LatencyTracker>,
        max_delay: Duration,
    ) -> Self {
        Self {
            surface,
            padder,
            metrics,
            tracker,
            max_delay,
        }
    }
}

impl<S> Layer<S> for ChaffLayer {
    type Service = ChaffService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ChaffService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ChaffService<S> {
    inner: S,
    layer: ChaffLayer,
}

impl<S> Service<Request<Body>> for ChaffService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let layer = self.layer.clone();

        if req.headers().contains_key(CHAFF_HEADER) {
            return Box::pin(async move {
                let delay = layer.tracker.mean().min(layer.max_delay);
                tokio::time::sleep(delay).await;
                Ok(decoy(&layer))
            });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let started = Instant::now();
            let result = inner.call(req).await;
            layer.tracker.record(started.elapsed());
            result
        })
    }
}

fn decoy(layer: &ChaffLayer) -> Response {
    let mut metrics = DeferredMetrics::new(Arc::clone(&layer.metrics));
    metrics.inc(PublishMetric::Chaff);

    let padding = layer.padder.pad(&mut metrics);
    let mut token = [0u8; REVISION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut token);

    debug!("answered chaff request");
    let response = layer
        .surface
        .decoy_response(URL_SAFE_NO_PAD.encode(token), padding);
    metrics.emit();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{v1, ApiVersion};
    use crate::middleware::metrics::PublishMetrics;
    use base64::Engine as _;

    #[tokio::test]
    async fn test_decoy_token_has_real_token_size() {
        let sink = Arc::new(PublishMetrics::new());
        let layer = ChaffLayer::new(
            Surface::Publish(ApiVersion::V1),
            ResponsePadder::new(0, 0),
            sink.clone(),
            Arc::new(LatencyTracker::new(4)),
            Duration::ZERO,
        );

        let response = decoy(&layer);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: v1::PublishResponse = serde_json::from_slice(&bytes).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&body.revision_token).unwrap();
        assert_eq!(raw.len(), REVISION_TOKEN_BYTES);
        assert_eq!(sink.get(PublishMetric::Chaff), 1);
    }

    #[test]
    fn test_tracker_mean() {
        let tracker = LatencyTracker::new(4);
        assert_eq!(tracker.mean(), Duration::ZERO);

        tracker.record(Duration::from_millis(10));
        tracker.record(Duration::from_millis(30));
        assert_eq!(tracker.mean(), Duration::from_millis(20));
    }

    #[test]
    fn test_tracker_window_is_bounded() {
        let tracker = LatencyTracker::new(2);
        tracker.record(Duration::from_millis(1000));
        tracker.record(Duration::from_millis(10));
        tracker.record(Duration::from_millis(30));
        assert_eq!(tracker.mean(), Duration::from_millis(20));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let tracker = LatencyTracker::new(0);
        tracker.record(Duration::from_millis(5));
        assert_eq!(tracker.mean(), Duration::from_millis(5));
    }
}
