//! Reference adapters for the outbound ports.

pub mod memory;
pub mod revision;
pub mod verifier;

pub use memory::{InMemoryExposureStore, StoredExposure};
pub use revision::SignedRevisionTokens;
pub use verifier::{canonical_key_string, sign_payload, sign_stats, SharedSecretVerifier};
