//! Canonical (v1) wire schema.

use serde::{Deserialize, Serialize};

use crate::domain::error::PublishError;
use crate::domain::padding::Padding;
use crate::domain::types::{DailyStats, ExposureKey};

/// Canonical publish request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Publish {
    #[serde(rename = "temporaryExposureKeys", default)]
    pub keys: Vec<ExposureKey>,
    #[serde(rename = "healthAuthorityID", default)]
    pub health_authority_id: String,
    #[serde(default)]
    pub verification_payload: String,
    #[serde(default)]
    pub hmac_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptom_onset_interval: Option<i32>,
    #[serde(default)]
    pub traveler: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<Padding>,
}

/// Canonical publish response.
///
/// `error` and `code` are set only on batch-level failure. Per-key problems
/// appear in `warnings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision_token: String,
    #[serde(default)]
    pub inserted_exposures: u32,
    #[serde(rename = "error", default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(rename = "code", default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<Padding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PublishResponse {
    pub fn from_error(err: &PublishError) -> Self {
        Self {
            error_message: err.to_string(),
            error_code: err.code().to_string(),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error_message.is_empty()
    }
}

/// Statistics request for one health authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StatsRequest {
    #[serde(rename = "healthAuthorityID", default)]
    pub health_authority_id: String,
    #[serde(default)]
    pub verification_payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<Padding>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(default)]
    pub days: Vec<DailyStats>,
    #[serde(rename = "error", default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<Padding>,
}

impl StatsResponse {
    pub fn from_error(err: &PublishError) -> Self {
        Self {
            error_message: err.to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_field_names() {
        let json = r#"{
            "temporaryExposureKeys": [
                {"key": "AAAAAAAAAAAAAAAAAAAAAA==", "rollingStartNumber": 100, "rollingPeriod": 144, "transmissionRisk": 2}
            ],
            "healthAuthorityID": "gov.example.health",
            "verificationPayload": "abc.def",
            "hmacKey": "c2VjcmV0",
            "symptomOnsetInterval": 90,
            "traveler": true,
            "revisionToken": "tok"
        }"#;
        let publish: Publish = serde_json::from_str(json).unwrap();
        assert_eq!(publish.keys.len(), 1);
        assert_eq!(publish.keys[0].interval_count, 144);
        assert_eq!(publish.health_authority_id, "gov.example.health");
        assert_eq!(publish.symptom_onset_interval, Some(90));
        assert!(publish.traveler);
        assert!(publish.padding.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<Publish, _> = serde_json::from_str(r#"{"regions": ["US"]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_response_shape() {
        let response = PublishResponse::from_error(&PublishError::MissingExposures);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["code"], "missing_exposures");
        assert!(json["error"].as_str().unwrap().contains("no exposure keys"));
        assert_eq!(json["insertedExposures"], 0);
        assert!(json.get("revisionToken").is_none());
    }
}
