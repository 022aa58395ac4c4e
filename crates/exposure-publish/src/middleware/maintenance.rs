//! Maintenance gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::header::RETRY_AFTER;
use axum::http::HeaderValue;
use axum::{body::Body, http::Request, response::Response};
use tower::{Layer, Service};
use tracing::debug;

use super::metrics::{DeferredMetrics, PublishMetric};
use crate::api::Surface;
use crate::domain::error::PublishError;
use crate::domain::padding::ResponsePadder;
use crate::ports::outbound::MetricsSink;

/// Runtime-togglable maintenance flag. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceSwitch(Arc<AtomicBool>);

impl MaintenanceSwitch {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

/// Layer that short-circuits every request while maintenance is on.
#[derive(Clone)]
pub struct MaintenanceLayer {
    switch: MaintenanceSwitch,
    surface: Surface,
    padder: ResponsePadder,
    metrics: Arc<dyn MetricsSink>,
    retry_after: Duration,
}

impl MaintenanceLayer {
    pub fn new(
        switch: MaintenanceSwitch,
        surface: Surface,
        padder: ResponsePadder,
        metrics: Arc<dyn MetricsSink>,
        retry_after: Duration,
    ) -> Self {
        Self {
            switch,
            surface,
            padder,
            metrics,
            retry_after,
        }
    }

    fn respond(&self) -> Response {
        let mut metrics = DeferredMetrics::new(Arc::clone(&self.metrics));
        metrics.inc(PublishMetric::Maintenance);
        let padding = self.padder.pad(&mut metrics);

        let mut response = self
            .surface
            .error_response(&PublishError::Maintenance, padding);
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(self.retry_after.as_secs()));
        metrics.emit();
        response
    }
}

impl<S> Layer<S> for MaintenanceLayer {
    type Service = MaintenanceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MaintenanceService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MaintenanceService<S> {
    inner: S,
    layer: MaintenanceLayer,
}

impl<S> Service<Request<Body>> for MaintenanceService<S>
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
        if self.layer.switch.is_enabled() {
            debug!(path = %req.uri().path(), "rejected during maintenance");
            let response = self.layer.respond();
            return Box::pin(async move { Ok(response) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_is_shared() {
        let switch = MaintenanceSwitch::new(false);
        let other = switch.clone();
        assert!(!other.is_enabled());
        switch.set(true);
        assert!(other.is_enabled());
    }
}
