//! Publish processing: authentication, revision handling and persistence.
//!
//! The processor only ever sees canonical requests. Legacy requests are
//! upconverted before they arrive, and the [`VersionBridge`] travels along so
//! the regions they named reach storage.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tracing::{debug, info, warn};

use crate::api::{v1, VersionBridge};
use crate::domain::error::{ErrorClass, PublishError};
use crate::domain::types::{ClientPlatform, DailyStats, Submission, SubmissionLineage};
use crate::middleware::metrics::{DeferredMetrics, PublishMetric};
use crate::ports::outbound::{
    AuthorityVerifier, ExposureStore, MetricsSink, RevisionTokens, VerificationRequest,
};

/// Result of processing one request.
///
/// Metrics are scheduled but not yet emitted; the caller pads the response
/// first and emits afterwards.
#[derive(Debug)]
pub struct Outcome<T> {
    pub status: StatusCode,
    pub response: T,
    pub metrics: DeferredMetrics,
}

/// Limits the processor enforces.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorLimits {
    pub max_keys: usize,
    pub backend_timeout: Duration,
}

pub struct PublishProcessor {
    limits: ProcessorLimits,
    verifier: Arc<dyn AuthorityVerifier>,
    tokens: Arc<dyn RevisionTokens>,
    store: Arc<dyn ExposureStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl PublishProcessor {
    pub fn new(
        limits: ProcessorLimits,
        verifier: Arc<dyn AuthorityVerifier>,
        tokens: Arc<dyn RevisionTokens>,
        store: Arc<dyn ExposureStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            limits,
            verifier,
            tokens,
            store,
            metrics,
        }
    }

    pub fn metrics_sink(&self) -> Arc<dyn MetricsSink> {
        Arc::clone(&self.metrics)
    }

    /// Process a canonical publish request.
    pub async fn process(
        &self,
        request: v1::Publish,
        platform: ClientPlatform,
        bridge: Option<&VersionBridge>,
    ) -> Outcome<v1::PublishResponse> {
        let mut metrics = DeferredMetrics::new(self.metrics_sink());
        match self.publish(request, platform, bridge, &mut metrics).await {
            Ok(response) => Outcome {
                status: StatusCode::OK,
                response,
                metrics,
            },
            Err(err) => self.fail(err, metrics),
        }
    }

    /// Outcome for a request that failed before it reached the processor.
    pub fn reject(&self, err: PublishError) -> Outcome<v1::PublishResponse> {
        self.fail(err, DeferredMetrics::new(self.metrics_sink()))
    }

    fn fail(&self, err: PublishError, mut metrics: DeferredMetrics) -> Outcome<v1::PublishResponse> {
        log_failure(&err);
        metrics.inc(err.metric());
        Outcome {
            status: err.status(),
            response: v1::PublishResponse::from_error(&err),
            metrics,
        }
    }

    async fn publish(
        &self,
        request: v1::Publish,
        platform: ClientPlatform,
        bridge: Option<&VersionBridge>,
        metrics: &mut DeferredMetrics,
    ) -> Result<v1::PublishResponse, PublishError> {
        let count = request.keys.len();
        if count == 0 {
            return Err(PublishError::MissingExposures);
        }
        if count > self.limits.max_keys {
            return Err(PublishError::TooManyExposures {
                count,
                max: self.limits.max_keys,
            });
        }

        let claims = self
            .with_deadline(self.verifier.verify(VerificationRequest {
                authority_id: &request.health_authority_id,
                payload: &request.verification_payload,
                hmac_key: &request.hmac_key,
                keys: &request.keys,
            }))
            .await?;

        let prior = if request.revision_token.is_empty() {
            None
        } else {
            metrics.inc(PublishMetric::RevisionRequest);
            Some(
                self.with_deadline(
                    self.tokens
                        .resolve(&request.revision_token, &claims.authority_id),
                )
                .await?,
            )
        };

        let traveler = request.traveler || bridge.is_some_and(VersionBridge::is_traveler);
        let regions = bridge.map(|b| b.regions().clone()).unwrap_or_default();
        let prior_keys = prior
            .as_ref()
            .map(|p| p.keys.clone())
            .unwrap_or_default();

        let submission = Submission {
            authority_id: claims.authority_id.clone(),
            keys: request.keys,
            regions,
            traveler,
            symptom_onset_interval: claims
                .symptom_onset_interval
                .or(request.symptom_onset_interval),
            platform,
            prior,
        };

        let outcome = self.with_deadline(self.store.upsert(submission)).await?;

        let keys: BTreeSet<_> = prior_keys.union(&outcome.accepted).copied().collect();
        let lineage = SubmissionLineage {
            lineage: outcome.lineage,
            authority_id: claims.authority_id.clone(),
            keys,
        };
        let revision_token = self.with_deadline(self.tokens.issue(&lineage)).await?;

        metrics.inc(PublishMetric::PublishSuccess);
        metrics.push(PublishMetric::InsertedExposures, outcome.inserted.into());
        metrics.push(PublishMetric::KeysRejected, outcome.rejections.len() as u64);
        if traveler {
            metrics.inc(PublishMetric::TravelerRequest);
        }

        info!(
            authority = %claims.authority_id,
            lineage = %outcome.lineage,
            platform = platform.as_str(),
            inserted = outcome.inserted,
            revised = outcome.revised,
            rejected = outcome.rejections.len(),
            traveler,
            "published exposure keys"
        );

        Ok(v1::PublishResponse {
            revision_token,
            inserted_exposures: outcome.inserted,
            warnings: outcome.rejections.iter().map(ToString::to_string).collect(),
            ..v1::PublishResponse::default()
        })
    }

    /// Serve the daily statistics of one authority.
    pub async fn stats(&self, request: v1::StatsRequest) -> Outcome<v1::StatsResponse> {
        let mut metrics = DeferredMetrics::new(self.metrics_sink());
        let result: Result<Vec<DailyStats>, PublishError> = async {
            self.with_deadline(
                self.verifier
                    .authorize_stats(&request.health_authority_id, &request.verification_payload),
            )
            .await?;
            self.with_deadline(self.store.stats(&request.health_authority_id))
                .await
        }
        .await;

        match result {
            Ok(days) => {
                metrics.inc(PublishMetric::StatsServed);
                debug!(authority = %request.health_authority_id, days = days.len(), "served stats");
                Outcome {
                    status: StatusCode::OK,
                    response: v1::StatsResponse {
                        days,
                        ..v1::StatsResponse::default()
                    },
                    metrics,
                }
            }
            Err(err) => self.reject_stats(err, metrics),
        }
    }

    pub fn reject_stats(
        &self,
        err: PublishError,
        mut metrics: DeferredMetrics,
    ) -> Outcome<v1::StatsResponse> {
        log_failure(&err);
        metrics.inc(err.metric());
        Outcome {
            status: err.status(),
            response: v1::StatsResponse::from_error(&err),
            metrics,
        }
    }

    /// Run a collaborator call under the backend deadline.
    async fn with_deadline<T, E, F>(&self, call: F) -> Result<T, PublishError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<PublishError>,
    {
        match tokio::time::timeout(self.limits.backend_timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(PublishError::DeadlineExceeded),
        }
    }
}

fn log_failure(err: &PublishError) {
    match err.class() {
        ErrorClass::Transient => warn!(error = %err, code = err.code(), "publish failed"),
        _ => debug!(error = %err, code = err.code(), "publish rejected"),
    }
}
