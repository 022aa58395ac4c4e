//! Shared-secret health authority verifier.
//!
//! Each health authority holds a secret shared with this service. A
//! verification payload has the form `<tekmac>.<signature>` or
//! `<tekmac>.<onset>.<signature>`:
//!
//! - `tekmac` is base64 `HMAC-SHA256(hmacKey, canonical key string)` and binds
//!   the payload to the exact keys submitted.
//! - `onset`, when present, is the symptom onset interval the authority
//!   certifies.
//! - `signature` is base64 `HMAC-SHA256(secret, everything before it)`.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::domain::types::{ExposureKey, VerifiedClaims};
use crate::ports::outbound::{AuthorityVerifier, VerificationError, VerificationRequest};

type HmacSha256 = Hmac<Sha256>;

const STATS_CONTEXT: &str = "stats:";

pub struct SharedSecretVerifier {
    secrets: HashMap<String, Vec<u8>>,
}

impl SharedSecretVerifier {
    pub fn new<I, K, V>(secrets: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<[u8]>,
    {
        Self {
            secrets: secrets
                .into_iter()
                .map(|(k, v)| (k.into(), v.as_ref().to_vec()))
                .collect(),
        }
    }

    fn secret(&self, authority_id: &str) -> Result<&[u8], VerificationError> {
        self.secrets
            .get(authority_id)
            .map(Vec::as_slice)
            .ok_or_else(|| VerificationError::Rejected("unknown health authority".into()))
    }
}

#[async_trait]
impl AuthorityVerifier for SharedSecretVerifier {
    async fn verify(
        &self,
        request: VerificationRequest<'_>,
    ) -> Result<VerifiedClaims, VerificationError> {
        let secret = self.secret(request.authority_id)?;

        let (signed, signature) = request
            .payload
            .rsplit_once('.')
            .ok_or_else(|| VerificationError::Rejected("malformed verification payload".into()))?;
        check_signature(secret, signed.as_bytes(), signature)?;

        let (tekmac, onset) = match signed.split_once('.') {
            Some((tekmac, onset)) => {
                let onset = onset.parse::<i32>().map_err(|_| {
                    VerificationError::Rejected("malformed symptom onset in payload".into())
                })?;
                (tekmac, Some(onset))
            }
            None => (signed, None),
        };

        let hmac_key = STANDARD
            .decode(request.hmac_key)
            .map_err(|_| VerificationError::Rejected("hmac key is not base64".into()))?;
        let expected = key_mac(&hmac_key, request.keys);
        let claimed = STANDARD
            .decode(tekmac)
            .map_err(|_| VerificationError::Rejected("malformed verification payload".into()))?;
        if !bool::from(expected.ct_eq(claimed.as_slice())) {
            return Err(VerificationError::Rejected(
                "payload does not match the submitted keys".into(),
            ));
        }

        debug!(authority = request.authority_id, "verification payload accepted");
        Ok(VerifiedClaims {
            authority_id: request.authority_id.to_string(),
            symptom_onset_interval: onset,
        })
    }

    async fn authorize_stats(
        &self,
        authority_id: &str,
        payload: &str,
    ) -> Result<(), VerificationError> {
        let secret = self.secret(authority_id)?;
        let message = format!("{}{}", STATS_CONTEXT, authority_id);
        check_signature(secret, message.as_bytes(), payload)
    }
}

fn check_signature(secret: &[u8], message: &[u8], signature: &str) -> Result<(), VerificationError> {
    let signature = STANDARD
        .decode(signature)
        .map_err(|_| VerificationError::Rejected("signature is not base64".into()))?;
    let mut mac = new_mac(secret);
    mac.update(message);
    mac.verify_slice(&signature)
        .map_err(|_| VerificationError::Rejected("signature mismatch".into()))
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    }
}

fn key_mac(hmac_key: &[u8], keys: &[ExposureKey]) -> Vec<u8> {
    let mut mac = new_mac(hmac_key);
    mac.update(canonical_key_string(keys).as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Keys rendered as `key.start.period.risk`, sorted by key and joined by `,`.
pub fn canonical_key_string(keys: &[ExposureKey]) -> String {
    let mut parts: Vec<String> = keys
        .iter()
        .map(|k| {
            format!(
                "{}.{}.{}.{}",
                k.key, k.interval_number, k.interval_count, k.transmission_risk
            )
        })
        .collect();
    parts.sort();
    parts.join(",")
}

/// Build the payload a health authority would issue for `keys`.
pub fn sign_payload(
    secret: &[u8],
    hmac_key: &[u8],
    keys: &[ExposureKey],
    onset: Option<i32>,
) -> String {
    let tekmac = STANDARD.encode(key_mac(hmac_key, keys));
    let signed = match onset {
        Some(onset) => format!("{}.{}", tekmac, onset),
        None => tekmac,
    };
    let mut mac = new_mac(secret);
    mac.update(signed.as_bytes());
    format!("{}.{}", signed, STANDARD.encode(mac.finalize().into_bytes()))
}

/// Build a stats authorization payload for `authority_id`.
pub fn sign_stats(secret: &[u8], authority_id: &str) -> String {
    let mut mac = new_mac(secret);
    mac.update(format!("{}{}", STATS_CONTEXT, authority_id).as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"authority-secret";
    const HMAC_KEY: &[u8] = b"client-hmac-key";

    fn keys() -> Vec<ExposureKey> {
        vec![
            ExposureKey {
                key: "BBBBBBBBBBBBBBBBBBBBBB==".into(),
                interval_number: 200,
                interval_count: 144,
                transmission_risk: 1,
            },
            ExposureKey {
                key: "AAAAAAAAAAAAAAAAAAAAAA==".into(),
                interval_number: 100,
                interval_count: 144,
                transmission_risk: 2,
            },
        ]
    }

    fn verifier() -> SharedSecretVerifier {
        SharedSecretVerifier::new([("gov.example", SECRET)])
    }

    #[test]
    fn test_canonical_key_string_is_sorted() {
        assert_eq!(
            canonical_key_string(&keys()),
            "AAAAAAAAAAAAAAAAAAAAAA==.100.144.2,BBBBBBBBBBBBBBBBBBBBBB==.200.144.1"
        );
    }

    #[tokio::test]
    async fn test_valid_payload_accepted() {
        let keys = keys();
        let payload = sign_payload(SECRET, HMAC_KEY, &keys, Some(12));
        let hmac_key = STANDARD.encode(HMAC_KEY);

        let claims = verifier()
            .verify(VerificationRequest {
                authority_id: "gov.example",
                payload: &payload,
                hmac_key: &hmac_key,
                keys: &keys,
            })
            .await
            .unwrap();
        assert_eq!(claims.authority_id, "gov.example");
        assert_eq!(claims.symptom_onset_interval, Some(12));
    }

    #[tokio::test]
    async fn test_tampered_keys_rejected() {
        let mut keys = keys();
        let payload = sign_payload(SECRET, HMAC_KEY, &keys, None);
        let hmac_key = STANDARD.encode(HMAC_KEY);
        keys[0].transmission_risk = 8;

        let result = verifier()
            .verify(VerificationRequest {
                authority_id: "gov.example",
                payload: &payload,
                hmac_key: &hmac_key,
                keys: &keys,
            })
            .await;
        assert!(matches!(result, Err(VerificationError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let keys = keys();
        let payload = sign_payload(b"other-secret", HMAC_KEY, &keys, None);
        let hmac_key = STANDARD.encode(HMAC_KEY);

        let result = verifier()
            .verify(VerificationRequest {
                authority_id: "gov.example",
                payload: &payload,
                hmac_key: &hmac_key,
                keys: &keys,
            })
            .await;
        assert!(matches!(result, Err(VerificationError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_unknown_authority_rejected() {
        let result = verifier()
            .verify(VerificationRequest {
                authority_id: "gov.unknown",
                payload: "a.b",
                hmac_key: "",
                keys: &[],
            })
            .await;
        assert_eq!(
            result,
            Err(VerificationError::Rejected("unknown health authority".into()))
        );
    }

    #[tokio::test]
    async fn test_stats_authorization() {
        let verifier = verifier();
        let payload = sign_stats(SECRET, "gov.example");
        assert!(verifier.authorize_stats("gov.example", &payload).await.is_ok());
        assert!(verifier.authorize_stats("gov.example", "bm9wZQ==").await.is_err());
    }
}
