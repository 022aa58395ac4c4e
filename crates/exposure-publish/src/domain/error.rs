//! Publish error taxonomy and its mapping onto HTTP status and wire codes.
//!
//! Batch-level failures only. Per-key problems are [`KeyRejection`]s and are
//! reported as warnings on an otherwise successful response.
//!
//! [`KeyRejection`]: crate::domain::types::KeyRejection

use axum::http::StatusCode;

use crate::middleware::metrics::PublishMetric;
use crate::ports::outbound::{RevisionError, StoreError, VerificationError};

/// Machine-readable error codes carried in the canonical `code` field.
pub mod codes {
    pub const UNSUPPORTED_CONTENT_TYPE: &str = "unsupported_content_type";
    pub const REQUEST_TOO_LARGE: &str = "request_too_large";
    pub const UNPARSABLE_REQUEST: &str = "unparsable_request";
    pub const MISSING_EXPOSURES: &str = "missing_exposures";
    pub const TOO_MANY_EXPOSURES: &str = "too_many_exposures";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const INVALID_REVISION_TOKEN: &str = "invalid_revision_token";
    pub const BACKEND_UNAVAILABLE: &str = "backend_unavailable";
    pub const BACKEND_TIMEOUT: &str = "backend_timeout";
    pub const MAINTENANCE: &str = "maintenance";
}

/// Coarse classification used for logging and retry guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller sent something unacceptable. Never retried as-is.
    Client,
    /// Revision token could not be honoured.
    Revision,
    /// Backend unreachable or slow. Safe to retry.
    Transient,
    /// Declared maintenance window.
    Maintenance,
}

/// A batch-level publish failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("content-type is not application/json")]
    UnsupportedContentType,

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("unable to parse request: {0}")]
    Malformed(String),

    #[error("request contains no exposure keys")]
    MissingExposures,

    #[error("too many exposure keys in request: {count}, max {max}")]
    TooManyExposures { count: usize, max: usize },

    #[error("unable to verify health authority payload: {0}")]
    Unauthorized(String),

    #[error("revision token rejected: {0}")]
    InvalidRevisionToken(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend deadline exceeded")]
    DeadlineExceeded,

    #[error("service is in maintenance mode, please try again later")]
    Maintenance,
}

impl PublishError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnsupportedContentType
            | Self::BodyTooLarge { .. }
            | Self::Malformed(_)
            | Self::MissingExposures
            | Self::TooManyExposures { .. }
            | Self::Unauthorized(_) => ErrorClass::Client,
            Self::InvalidRevisionToken(_) => ErrorClass::Revision,
            Self::Unavailable(_) | Self::DeadlineExceeded => ErrorClass::Transient,
            Self::Maintenance => ErrorClass::Maintenance,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Malformed(_) | Self::MissingExposures | Self::TooManyExposures { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidRevisionToken(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) | Self::DeadlineExceeded => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Maintenance => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedContentType => codes::UNSUPPORTED_CONTENT_TYPE,
            Self::BodyTooLarge { .. } => codes::REQUEST_TOO_LARGE,
            Self::Malformed(_) => codes::UNPARSABLE_REQUEST,
            Self::MissingExposures => codes::MISSING_EXPOSURES,
            Self::TooManyExposures { .. } => codes::TOO_MANY_EXPOSURES,
            Self::Unauthorized(_) => codes::UNAUTHORIZED,
            Self::InvalidRevisionToken(_) => codes::INVALID_REVISION_TOKEN,
            Self::Unavailable(_) => codes::BACKEND_UNAVAILABLE,
            Self::DeadlineExceeded => codes::BACKEND_TIMEOUT,
            Self::Maintenance => codes::MAINTENANCE,
        }
    }

    /// Counter recorded when a request fails with this error.
    pub fn metric(&self) -> PublishMetric {
        match self {
            Self::UnsupportedContentType => PublishMetric::BadContentType,
            Self::BodyTooLarge { .. } => PublishMetric::BodyTooLarge,
            Self::Malformed(_) => PublishMetric::BadJson,
            Self::MissingExposures => PublishMetric::EmptyKeys,
            Self::TooManyExposures { .. } => PublishMetric::TooManyKeys,
            Self::Unauthorized(_) => PublishMetric::VerificationFailed,
            Self::InvalidRevisionToken(_) => PublishMetric::BadRevisionToken,
            Self::Unavailable(_) => PublishMetric::BackendUnavailable,
            Self::DeadlineExceeded => PublishMetric::BackendTimeout,
            Self::Maintenance => PublishMetric::Maintenance,
        }
    }
}

impl From<VerificationError> for PublishError {
    fn from(e: VerificationError) -> Self {
        match e {
            VerificationError::Rejected(reason) => Self::Unauthorized(reason),
            VerificationError::Unavailable(reason) => {
                Self::Unavailable(format!("verification: {}", reason))
            }
        }
    }
}

impl From<RevisionError> for PublishError {
    fn from(e: RevisionError) -> Self {
        match e {
            RevisionError::Unavailable(reason) => {
                Self::Unavailable(format!("revision tokens: {}", reason))
            }
            other => Self::InvalidRevisionToken(other.to_string()),
        }
    }
}

impl From<StoreError> for PublishError {
    fn from(e: StoreError) -> Self {
        Self::Unavailable(format!("storage: {}", e))
    }
}

/// Process-level errors (setup, binding), not surfaced to clients.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Metrics registration error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
