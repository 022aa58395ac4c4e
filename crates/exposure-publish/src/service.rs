//! Publish service - wires collaborators, middleware and routes into one
//! HTTP server.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tracing::{info, warn};

use crate::domain::config::PublishConfig;
use crate::domain::error::ServerError;
use crate::domain::padding::ResponsePadder;
use crate::middleware::{LatencyTracker, MaintenanceSwitch};
use crate::ports::outbound::{AuthorityVerifier, ExposureStore, MetricsSink, RevisionTokens};
use crate::processor::{ProcessorLimits, PublishProcessor};
use crate::router::{build_router, AppState, RouterParts};

/// The outbound collaborators the service is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub verifier: Arc<dyn AuthorityVerifier>,
    pub tokens: Arc<dyn RevisionTokens>,
    pub store: Arc<dyn ExposureStore>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// Publish service state
pub struct PublishService {
    config: PublishConfig,
    state: AppState,
    maintenance: MaintenanceSwitch,
    latency: Arc<LatencyTracker>,
}

impl PublishService {
    /// Create a new publish service
    pub fn new(config: PublishConfig, collaborators: Collaborators) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let processor = PublishProcessor::new(
            ProcessorLimits {
                max_keys: config.max_keys_on_publish,
                backend_timeout: config.backend_timeout,
            },
            collaborators.verifier,
            collaborators.tokens,
            collaborators.store,
            collaborators.metrics,
        );

        let state = AppState {
            processor: Arc::new(processor),
            padder: ResponsePadder::new(
                config.response_padding_min_bytes,
                config.response_padding_range,
            ),
            max_body_bytes: config.max_body_bytes,
        };

        if config.maintenance_mode {
            warn!("starting in maintenance mode");
        }

        Ok(Self {
            maintenance: MaintenanceSwitch::new(config.maintenance_mode),
            latency: Arc::new(LatencyTracker::new(config.chaff_latency_window)),
            config,
            state,
        })
    }

    /// Handle for toggling maintenance mode at runtime.
    pub fn maintenance(&self) -> MaintenanceSwitch {
        self.maintenance.clone()
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        build_router(RouterParts {
            config: self.config.clone(),
            state: self.state.clone(),
            maintenance: self.maintenance.clone(),
            latency: Arc::clone(&self.latency),
        })
    }

    /// Bind and serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.addr();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))?;

        info!(
            addr = %addr,
            legacy_api = self.config.enable_legacy_api,
            maintenance = self.maintenance.is_enabled(),
            "Starting publish server"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        info!("Publish server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
