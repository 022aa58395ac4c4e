//! Core domain types for exposure key publishing.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Decoded length of a temporary exposure key.
pub const KEY_LENGTH: usize = 16;

/// Maximum rolling period: one day of 10-minute intervals.
pub const MAX_INTERVAL_COUNT: i32 = 144;

/// Transmission risk is a small integer bucket.
pub const MAX_TRANSMISSION_RISK: i32 = 8;

/// Size of a revision token before base64url encoding. Tokens never vary in
/// length with the submission, and decoy replies carry the same size.
pub const REVISION_TOKEN_BYTES: usize = 88;

/// A diagnosis key as submitted by a client.
///
/// Key material is opaque base64 text at this layer. Validation of the
/// decoded length and interval bounds belongs to the store, which reports
/// per-key rejections instead of failing the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExposureKey {
    pub key: String,
    #[serde(rename = "rollingStartNumber")]
    pub interval_number: i32,
    #[serde(rename = "rollingPeriod")]
    pub interval_count: i32,
    #[serde(rename = "transmissionRisk", default)]
    pub transmission_risk: i32,
}

impl ExposureKey {
    /// Content identity of the key, independent of its metadata.
    pub fn fingerprint(&self) -> KeyFingerprint {
        KeyFingerprint::of(self.key.as_bytes())
    }
}

/// SHA-256 of the key material. Used as the storage identity and inside
/// revision tokens so raw keys never leave the store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyFingerprint([u8; 32]);

impl KeyFingerprint {
    pub fn of(material: &[u8]) -> Self {
        Self(Sha256::digest(material).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyFingerprint({})", &hex::encode(self.0)[..12])
    }
}

impl Serialize for KeyFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for KeyFingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// Identifier of a chain of revisions that started with one fresh submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineageId(Uuid);

impl LineageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for LineageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LineageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything a revision token proves about an earlier submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionLineage {
    pub lineage: LineageId,
    pub authority_id: String,
    pub keys: BTreeSet<KeyFingerprint>,
}

/// Calling client platform, derived from the User-Agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientPlatform {
    Android,
    Ios,
    Unknown,
}

impl ClientPlatform {
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent else {
            return Self::Unknown;
        };
        let ua = ua.to_ascii_lowercase();
        if ua.contains("android") {
            Self::Android
        } else if ua.contains("darwin") || ua.contains("ios") || ua.contains("iphone") {
            Self::Ios
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Unknown => "unknown",
        }
    }
}

/// Claims the verification service vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub authority_id: String,
    /// Onset interval certified by the health authority. Overrides the
    /// client-supplied value when present.
    pub symptom_onset_interval: Option<i32>,
}

/// A verified batch handed to the store.
#[derive(Debug, Clone)]
pub struct Submission {
    pub authority_id: String,
    pub keys: Vec<ExposureKey>,
    pub regions: BTreeSet<String>,
    pub traveler: bool,
    pub symptom_onset_interval: Option<i32>,
    pub platform: ClientPlatform,
    pub prior: Option<SubmissionLineage>,
}

/// A key the store declined without failing the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRejection {
    pub index: usize,
    pub reason: String,
}

impl fmt::Display for KeyRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key {}: {}", self.index, self.reason)
    }
}

/// Result of a store upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub lineage: LineageId,
    /// Keys that did not exist before this call.
    pub inserted: u32,
    /// Existing keys of the same lineage whose metadata changed.
    pub revised: u32,
    /// Every key now owned by the lineage as a result of this call.
    pub accepted: BTreeSet<KeyFingerprint>,
    pub rejections: Vec<KeyRejection>,
}

/// Publish counts split by client platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCounts {
    pub unknown: u64,
    pub android: u64,
    pub ios: u64,
}

impl PlatformCounts {
    pub fn increment(&mut self, platform: ClientPlatform) {
        match platform {
            ClientPlatform::Android => self.android += 1,
            ClientPlatform::Ios => self.ios += 1,
            ClientPlatform::Unknown => self.unknown += 1,
        }
    }
}

/// Per-authority aggregate for one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub day: NaiveDate,
    pub publish_requests: PlatformCounts,
    #[serde(rename = "totalTEKsPublished")]
    pub total_teks_published: u64,
    pub revision_requests: u64,
    pub traveler_requests: u64,
    pub missing_onset: u64,
}

impl DailyStats {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            publish_requests: PlatformCounts::default(),
            total_teks_published: 0,
            revision_requests: 0,
            traveler_requests: 0,
            missing_onset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_from_user_agent() {
        assert_eq!(
            ClientPlatform::from_user_agent(Some("okhttp/4.9 (Linux; Android 11)")),
            ClientPlatform::Android
        );
        assert_eq!(
            ClientPlatform::from_user_agent(Some("ExposureApp/1 CFNetwork/1206 Darwin/20.1.0")),
            ClientPlatform::Ios
        );
        assert_eq!(ClientPlatform::from_user_agent(Some("curl/8.0")), ClientPlatform::Unknown);
        assert_eq!(ClientPlatform::from_user_agent(None), ClientPlatform::Unknown);
    }

    #[test]
    fn test_fingerprint_ignores_metadata() {
        let a = ExposureKey {
            key: "AAAAAAAAAAAAAAAAAAAAAA==".into(),
            interval_number: 100,
            interval_count: 144,
            transmission_risk: 2,
        };
        let mut b = a.clone();
        b.transmission_risk = 5;
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_serde_is_hex() {
        let fp = KeyFingerprint::of(b"k1");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json.len(), 64 + 2);
        let back: KeyFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn test_rejection_display() {
        let r = KeyRejection {
            index: 3,
            reason: "invalid rolling period".into(),
        };
        assert_eq!(r.to_string(), "key 3: invalid rolling period");
    }
}
