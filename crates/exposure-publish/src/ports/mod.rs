//! Ports (hexagonal architecture).

pub mod outbound;

pub use outbound::{
    AuthorityVerifier, ExposureStore, MetricsSink, RevisionError, RevisionTokens, StoreError,
    SystemTimeSource, TimeSource, VerificationError, VerificationRequest,
};
