//! HTTP routes and handlers.

use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower::ServiceBuilder;

use crate::api::{
    decode_json, render_json, v1, ApiVersion, PublishEnvelope, PublishReply, Surface,
};
use crate::domain::config::PublishConfig;
use crate::domain::error::PublishError;
use crate::domain::padding::ResponsePadder;
use crate::domain::types::ClientPlatform;
use crate::middleware::metrics::{DeferredMetrics, PublishMetric};
use crate::middleware::{
    ChaffLayer, LatencyTracker, MaintenanceLayer, MaintenanceSwitch, TracingLayer,
};
use crate::processor::{Outcome, PublishProcessor};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<PublishProcessor>,
    pub padder: ResponsePadder,
    pub max_body_bytes: usize,
}

/// Everything needed to assemble the router.
pub struct RouterParts {
    pub config: PublishConfig,
    pub state: AppState,
    pub maintenance: MaintenanceSwitch,
    pub latency: Arc<LatencyTracker>,
}

pub fn build_router(parts: RouterParts) -> Router {
    let RouterParts {
        config,
        state,
        maintenance,
        latency,
    } = parts;
    let sink = state.processor.metrics_sink();

    let maintenance_layer = |surface| {
        MaintenanceLayer::new(
            maintenance.clone(),
            surface,
            state.padder,
            Arc::clone(&sink),
            config.maintenance_retry_after,
        )
    };
    let chaff_layer = |surface| {
        ChaffLayer::new(
            surface,
            state.padder,
            Arc::clone(&sink),
            Arc::clone(&latency),
            config.chaff_max_delay,
        )
    };

    // chaff outermost, then maintenance
    let publish_layers = |surface| {
        ServiceBuilder::new()
            .layer(chaff_layer(surface))
            .layer(maintenance_layer(surface))
    };

    let mut router = Router::new()
        .route(
            "/v1/publish",
            post(publish_v1).layer(publish_layers(Surface::Publish(ApiVersion::V1))),
        )
        .route(
            "/v1/stats",
            post(stats).layer(maintenance_layer(Surface::Stats)),
        )
        .route("/health", get(health_check));

    if config.enable_legacy_api {
        router = router.route(
            "/",
            post(publish_v1alpha1).layer(publish_layers(Surface::Publish(ApiVersion::V1Alpha1))),
        );
    }

    router.layer(TracingLayer::new()).with_state(state)
}

async fn publish_v1(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Response {
    handle_publish(&state, ApiVersion::V1, &headers, body).await
}

async fn publish_v1alpha1(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    handle_publish(&state, ApiVersion::V1Alpha1, &headers, body).await
}

/// Decode, process, pad, emit metrics, render. Padding is attached to the
/// canonical response before any downconversion so both schemas carry it.
async fn handle_publish(
    state: &AppState,
    version: ApiVersion,
    headers: &HeaderMap,
    body: Body,
) -> Response {
    let platform = ClientPlatform::from_user_agent(
        headers.get(USER_AGENT).and_then(|v| v.to_str().ok()),
    );

    let decoded = read_body(headers, body, state.max_body_bytes)
        .await
        .and_then(|bytes| PublishEnvelope::decode(version, headers, &bytes));

    let (outcome, bridge) = match decoded {
        Ok(envelope) => {
            let (request, bridge) = envelope.into_canonical();
            let outcome = state
                .processor
                .process(request, platform, bridge.as_ref())
                .await;
            (outcome, bridge)
        }
        Err(err) => (state.processor.reject(err), None),
    };

    let Outcome {
        status,
        mut response,
        mut metrics,
    } = outcome;
    if version == ApiVersion::V1Alpha1 {
        metrics.inc(PublishMetric::LegacyRequest);
    }

    response.padding = state.padder.pad(&mut metrics);
    let reply = PublishReply::new(version, response, bridge.as_ref());
    metrics.emit();
    reply.render(status)
}

async fn stats(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Response {
    let decoded = read_body(&headers, body, state.max_body_bytes)
        .await
        .and_then(|bytes| decode_json::<v1::StatsRequest>(&headers, &bytes));

    let Outcome {
        status,
        mut response,
        mut metrics,
    } = match decoded {
        Ok(request) => state.processor.stats(request).await,
        Err(err) => {
            let metrics = DeferredMetrics::new(state.processor.metrics_sink());
            state.processor.reject_stats(err, metrics)
        }
    };

    response.padding = state.padder.pad(&mut metrics);
    metrics.emit();
    render_json(status, ApiVersion::V1, &response)
}

/// Read at most `limit` bytes of body.
async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, PublishError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(PublishError::BodyTooLarge { limit });
    }

    // Failure here is either the limit or a broken connection; the caller
    // cannot see the response in the latter case.
    to_bytes(body, limit)
        .await
        .map_err(|_| PublishError::BodyTooLarge { limit })
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "service": "exposure-publish",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
