//! Signed revision tokens with a server-side key ledger.
//!
//! A token is base64url of a fixed 88-byte record:
//!
//! ```text
//! lineage (16) | issued_at, big-endian secs (8) | SHA-256(authority) (32) | HMAC-SHA256 (32)
//! ```
//!
//! The key fingerprints a lineage owns stay in the ledger, so a token is the
//! same size whether it covers one key or thirty.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::domain::types::{KeyFingerprint, LineageId, SubmissionLineage, REVISION_TOKEN_BYTES};
use crate::ports::outbound::{RevisionError, RevisionTokens, TimeSource};

type HmacSha256 = Hmac<Sha256>;

const LINEAGE_END: usize = 16;
const ISSUED_END: usize = LINEAGE_END + 8;
const SIGNED_LEN: usize = ISSUED_END + 32;

pub struct SignedRevisionTokens {
    secret: Vec<u8>,
    ttl: Duration,
    clock: Arc<dyn TimeSource>,
    ledger: DashMap<LineageId, BTreeSet<KeyFingerprint>>,
}

impl SignedRevisionTokens {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            ttl,
            clock,
            ledger: DashMap::new(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, RevisionError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| RevisionError::Unavailable(format!("bad token secret: {}", e)))
    }

    fn decode(&self, token: &str) -> Result<[u8; REVISION_TOKEN_BYTES], RevisionError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| RevisionError::Invalid("malformed token".into()))?;
        let raw: [u8; REVISION_TOKEN_BYTES] = raw
            .try_into()
            .map_err(|_| RevisionError::Invalid("malformed token".into()))?;

        let mut mac = self.mac()?;
        mac.update(&raw[..SIGNED_LEN]);
        mac.verify_slice(&raw[SIGNED_LEN..])
            .map_err(|_| RevisionError::Invalid("signature mismatch".into()))?;
        Ok(raw)
    }
}

fn authority_digest(authority_id: &str) -> [u8; 32] {
    Sha256::digest(authority_id.as_bytes()).into()
}

#[async_trait]
impl RevisionTokens for SignedRevisionTokens {
    async fn resolve(
        &self,
        token: &str,
        authority_id: &str,
    ) -> Result<SubmissionLineage, RevisionError> {
        let raw = self.decode(token)?;

        let mut lineage = [0u8; 16];
        lineage.copy_from_slice(&raw[..LINEAGE_END]);
        let lineage = LineageId::from_bytes(lineage);
        let mut issued_at = [0u8; 8];
        issued_at.copy_from_slice(&raw[LINEAGE_END..ISSUED_END]);
        let issued_at = u64::from_be_bytes(issued_at);

        let expires_at = issued_at.saturating_add(self.ttl.as_secs());
        if self.clock.now() > expires_at {
            return Err(RevisionError::Expired);
        }
        let expected = authority_digest(authority_id);
        if !bool::from(raw[ISSUED_END..SIGNED_LEN].ct_eq(&expected[..])) {
            return Err(RevisionError::WrongAuthority);
        }

        let keys = self
            .ledger
            .get(&lineage)
            .map(|keys| keys.value().clone())
            .ok_or_else(|| RevisionError::Invalid("unknown revision lineage".into()))?;

        Ok(SubmissionLineage {
            lineage,
            authority_id: authority_id.to_string(),
            keys,
        })
    }

    async fn issue(&self, lineage: &SubmissionLineage) -> Result<String, RevisionError> {
        self.ledger
            .entry(lineage.lineage)
            .or_default()
            .extend(lineage.keys.iter().copied());

        let mut raw = [0u8; REVISION_TOKEN_BYTES];
        raw[..LINEAGE_END].copy_from_slice(lineage.lineage.as_bytes());
        raw[LINEAGE_END..ISSUED_END].copy_from_slice(&self.clock.now().to_be_bytes());
        raw[ISSUED_END..SIGNED_LEN].copy_from_slice(&authority_digest(&lineage.authority_id));

        let mut mac = self.mac()?;
        mac.update(&raw[..SIGNED_LEN]);
        raw[SIGNED_LEN..].copy_from_slice(&mac.finalize().into_bytes());
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ManualClock(AtomicU64);

    impl TimeSource for ManualClock {
        fn now(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn setup() -> (SignedRevisionTokens, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock(AtomicU64::new(1_700_000_000)));
        let tokens = SignedRevisionTokens::new("token-secret-0123456789", Duration::from_secs(3600), clock.clone());
        (tokens, clock)
    }

    fn lineage_of(count: u8) -> SubmissionLineage {
        SubmissionLineage {
            lineage: LineageId::new(),
            authority_id: "gov.example".into(),
            keys: (0..count).map(|i| KeyFingerprint::of(&[i])).collect(),
        }
    }

    fn lineage() -> SubmissionLineage {
        lineage_of(2)
    }

    #[tokio::test]
    async fn test_issue_then_resolve() {
        let (tokens, _) = setup();
        let lineage = lineage();
        let token = tokens.issue(&lineage).await.unwrap();
        let resolved = tokens.resolve(&token, "gov.example").await.unwrap();
        assert_eq!(resolved, lineage);
    }

    #[tokio::test]
    async fn test_token_length_independent_of_keys() {
        let (tokens, _) = setup();
        let one = tokens.issue(&lineage_of(1)).await.unwrap();
        let thirty = tokens.issue(&lineage_of(30)).await.unwrap();

        assert_eq!(one.len(), thirty.len());
        assert_eq!(URL_SAFE_NO_PAD.decode(&thirty).unwrap().len(), REVISION_TOKEN_BYTES);
        assert_eq!(tokens.resolve(&thirty, "gov.example").await.unwrap().keys.len(), 30);
    }

    #[tokio::test]
    async fn test_reissue_grows_ledger() {
        let (tokens, _) = setup();
        let mut lineage = lineage();
        let first = tokens.issue(&lineage).await.unwrap();
        lineage.keys.insert(KeyFingerprint::of(b"later"));
        tokens.issue(&lineage).await.unwrap();

        let resolved = tokens.resolve(&first, "gov.example").await.unwrap();
        assert_eq!(resolved.keys.len(), 3);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (tokens, clock) = setup();
        let token = tokens.issue(&lineage()).await.unwrap();
        clock.0.fetch_add(3601, Ordering::Relaxed);
        assert_eq!(
            tokens.resolve(&token, "gov.example").await,
            Err(RevisionError::Expired)
        );
    }

    #[tokio::test]
    async fn test_foreign_authority() {
        let (tokens, _) = setup();
        let token = tokens.issue(&lineage()).await.unwrap();
        assert_eq!(
            tokens.resolve(&token, "gov.other").await,
            Err(RevisionError::WrongAuthority)
        );
    }

    #[tokio::test]
    async fn test_tampered_token() {
        let (tokens, _) = setup();
        let token = tokens.issue(&lineage()).await.unwrap();
        let mut forged = URL_SAFE_NO_PAD.decode(&token).unwrap();
        forged[5] ^= 1;
        let forged = URL_SAFE_NO_PAD.encode(forged);

        assert!(matches!(
            tokens.resolve(&forged, "gov.example").await,
            Err(RevisionError::Invalid(_))
        ));
        assert!(matches!(
            tokens.resolve("not-a-token", "gov.example").await,
            Err(RevisionError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_other_secret_rejected() {
        let (tokens, clock) = setup();
        let other = SignedRevisionTokens::new("another-secret-98765", Duration::from_secs(3600), clock);
        let token = other.issue(&lineage()).await.unwrap();
        assert!(matches!(
            tokens.resolve(&token, "gov.example").await,
            Err(RevisionError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_lineage_rejected() {
        let (tokens, clock) = setup();
        let restarted =
            SignedRevisionTokens::new("token-secret-0123456789", Duration::from_secs(3600), clock);
        let token = tokens.issue(&lineage()).await.unwrap();
        assert!(matches!(
            restarted.resolve(&token, "gov.example").await,
            Err(RevisionError::Invalid(_))
        ));
    }
}
