//! # Exposure Server
//!
//! Entry point for the diagnosis key publish service.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (logs, optional OTLP export, metric registry)
//! 2. Load configuration from `EN_*` environment variables
//! 3. Wire the reference adapters (shared-secret verifier, signed revision
//!    tokens, in-memory store) and the Prometheus sink
//! 4. Start the metrics listener
//! 5. Serve until Ctrl-C/SIGTERM, draining in-flight requests

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{error, info, warn};

use exposure_publish::adapters::{InMemoryExposureStore, SharedSecretVerifier, SignedRevisionTokens};
use exposure_publish::{
    shutdown_signal, Collaborators, PrometheusMetrics, PublishConfig, PublishService,
    SystemTimeSource, TimeSource,
};
use exposure_telemetry::{init_telemetry, MetricsHandle, TelemetryConfig, TelemetryGuard};

/// Load configuration: defaults overridden by the environment.
fn load_config() -> Result<PublishConfig> {
    let mut config = PublishConfig::default()
        .with_env_overrides()
        .context("reading EN_* environment")?;

    if config.revision_token_secret.is_empty() {
        let mut secret = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut secret)
            .context("generating revision token secret")?;
        config.revision_token_secret = hex::encode(secret);
        warn!("EN_REVISION_TOKEN_SECRET not set; using an ephemeral secret, tokens will not survive a restart");
    }

    if config.authority_secrets.is_empty() {
        warn!("EN_AUTHORITY_SECRETS not set; every publish will be rejected as unauthorized");
    }

    Ok(config)
}

fn metrics_router(handle: MetricsHandle) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move {
                    match handle.encode() {
                        Ok(body) => (StatusCode::OK, body).into_response(),
                        Err(e) => {
                            error!(error = %e, "failed to encode metrics");
                            StatusCode::INTERNAL_SERVER_ERROR.into_response()
                        }
                    }
                }
            }),
        )
        .route("/health", get(|| async { "ok" }))
}

async fn run(guard: &TelemetryGuard, metrics_port: u16) -> Result<()> {
    let config = load_config()?;

    let clock: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let sink = PrometheusMetrics::register(guard.metrics().registry())
        .context("registering publish metrics")?;

    let collaborators = Collaborators {
        verifier: Arc::new(SharedSecretVerifier::new(config.authority_secrets.clone())),
        tokens: Arc::new(SignedRevisionTokens::new(
            &config.revision_token_secret,
            config.revision_token_ttl,
            Arc::clone(&clock),
        )),
        store: Arc::new(InMemoryExposureStore::new(clock)),
        metrics: Arc::new(sink),
    };

    let service = PublishService::new(config, collaborators).context("building publish service")?;

    let metrics_addr = SocketAddr::new(service.config().host, metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("binding metrics listener on {}", metrics_addr))?;
    let metrics_app = metrics_router(guard.metrics().clone());
    tokio::spawn(async move {
        info!(addr = %metrics_addr, "Starting metrics server");
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            error!(error = %e, "metrics server failed");
        }
    });

    service
        .serve(shutdown_signal())
        .await
        .context("serving publish API")?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let telemetry = TelemetryConfig::from_env();
    let metrics_port = telemetry.metrics_port;

    let guard = match init_telemetry(telemetry).await {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("fatal: telemetry initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&guard, metrics_port).await {
        error!(error = ?e, "fatal: exposure server exited");
        drop(guard);
        std::process::exit(1);
    }

    info!("Exposure server shut down cleanly");
}
