//! Legacy (v1alpha1) wire schema, served on `/`.

use serde::{Deserialize, Serialize};

use crate::domain::padding::Padding;

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

/// Legacy publish request. The app package name doubles as the health
/// authority identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Publish {
    #[serde(rename = "temporaryExposureKeys", default)]
    pub keys: Vec<ExposureKey>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub app_package_name: String,
    #[serde(default)]
    pub verification_payload: String,
    #[serde(rename = "hmackey", default)]
    pub hmac_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptom_onset_interval: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<Padding>,
}

/// Legacy publish response. `error` is always present, empty on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision_token: String,
    #[serde(default)]
    pub inserted_exposures: u32,
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<Padding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_field_names() {
        let json = r#"{
            "temporaryExposureKeys": [{"key": "k1", "rollingStartNumber": 100, "rollingPeriod": 144, "transmissionRisk": 2}],
            "regions": ["US", "CA"],
            "appPackageName": "com.example.app",
            "verificationPayload": "payload",
            "hmackey": "aG1hYw=="
        }"#;
        let publish: Publish = serde_json::from_str(json).unwrap();
        assert_eq!(publish.regions, vec!["US", "CA"]);
        assert_eq!(publish.app_package_name, "com.example.app");
        assert_eq!(publish.hmac_key, "aG1hYw==");
        assert!(publish.revision_token.is_empty());
    }

    #[test]
    fn test_success_response_keeps_empty_error() {
        let response = PublishResponse {
            inserted_exposures: 1,
            ..PublishResponse::default()
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"], "");
        assert_eq!(json["insertedExposures"], 1);
    }
}
