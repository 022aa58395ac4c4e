//! Outbound ports for the publish service.
//!
//! Each collaborator the processor talks to sits behind one of these traits.
//! Implementations must be `Send + Sync`; they are shared by every request.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::types::{
    DailyStats, ExposureKey, SubmissionLineage, Submission, UpsertOutcome, VerifiedClaims,
};
use crate::middleware::metrics::PublishMetric;

/// Verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// The payload does not vouch for these keys.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The verifier could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Inputs to a publish verification.
#[derive(Debug, Clone, Copy)]
pub struct VerificationRequest<'a> {
    pub authority_id: &'a str,
    pub payload: &'a str,
    pub hmac_key: &'a str,
    pub keys: &'a [ExposureKey],
}

/// Authenticates submissions against a health authority.
#[async_trait]
pub trait AuthorityVerifier: Send + Sync {
    /// Check that the payload certifies exactly this key set.
    async fn verify(
        &self,
        request: VerificationRequest<'_>,
    ) -> Result<VerifiedClaims, VerificationError>;

    /// Check that the caller may read the authority's statistics.
    async fn authorize_stats(
        &self,
        authority_id: &str,
        payload: &str,
    ) -> Result<(), VerificationError>;
}

/// Revision token failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RevisionError {
    #[error("invalid revision token: {0}")]
    Invalid(String),
    #[error("revision token expired")]
    Expired,
    #[error("revision token issued to a different health authority")]
    WrongAuthority,
    #[error("revision token service unavailable: {0}")]
    Unavailable(String),
}

/// Issues and resolves revision tokens.
#[async_trait]
pub trait RevisionTokens: Send + Sync {
    /// Resolve a token presented by `authority_id` to its lineage.
    async fn resolve(
        &self,
        token: &str,
        authority_id: &str,
    ) -> Result<SubmissionLineage, RevisionError>;

    /// Issue a token proving ownership of `lineage`. Implementations must
    /// return tokens whose length does not depend on the lineage, or response
    /// size would tell real publishes apart from decoys.
    async fn issue(&self, lineage: &SubmissionLineage) -> Result<String, RevisionError>;
}

/// Storage failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

/// Durable home of published keys.
#[async_trait]
pub trait ExposureStore: Send + Sync {
    /// Insert or revise the submission's keys atomically.
    ///
    /// Per-key problems come back as rejections; only failures that affect
    /// the whole batch are errors.
    async fn upsert(&self, submission: Submission) -> Result<UpsertOutcome, StoreError>;

    /// Daily aggregates for one authority, oldest first.
    async fn stats(&self, authority_id: &str) -> Result<Vec<DailyStats>, StoreError>;
}

/// Destination for publish counters.
pub trait MetricsSink: Send + Sync {
    fn add(&self, metric: PublishMetric, amount: u64);

    fn inc(&self, metric: PublishMetric) {
        self.add(metric, 1);
    }
}

/// Time source trait for testability
pub trait TimeSource: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> u64;
}

/// System time implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            // Clock before Unix epoch: return 0 rather than panic
            .unwrap_or(0)
    }
}
