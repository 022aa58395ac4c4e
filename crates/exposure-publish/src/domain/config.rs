//! Publish service configuration with validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main publish service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Bind address
    pub host: IpAddr,
    /// Listening port (default: 8080)
    pub port: u16,
    /// Serve the legacy v1alpha1 schema on `/`
    pub enable_legacy_api: bool,
    /// Minimum number of padding bytes added to every response
    pub response_padding_min_bytes: usize,
    /// Padding length is drawn from `[min, min + range)`
    pub response_padding_range: usize,
    /// Initial state of the maintenance gate
    pub maintenance_mode: bool,
    /// `Retry-After` advertised while in maintenance
    #[serde(with = "humantime_serde")]
    pub maintenance_retry_after: Duration,
    /// Maximum keys accepted in one publish request
    pub max_keys_on_publish: usize,
    /// Maximum accepted request body size
    pub max_body_bytes: usize,
    /// Deadline for each verification, token or storage call
    #[serde(with = "humantime_serde")]
    pub backend_timeout: Duration,
    /// Upper bound on the artificial delay applied to chaff responses
    #[serde(with = "humantime_serde")]
    pub chaff_max_delay: Duration,
    /// Number of genuine request latencies remembered for chaff timing
    pub chaff_latency_window: usize,
    /// Lifetime of an issued revision token
    #[serde(with = "humantime_serde")]
    pub revision_token_ttl: Duration,
    /// HMAC secret used to sign revision tokens
    pub revision_token_secret: String,
    /// Shared secrets per health authority ID
    pub authority_secrets: HashMap<String, String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            enable_legacy_api: true,
            response_padding_min_bytes: 1024,
            response_padding_range: 1024,
            maintenance_mode: false,
            maintenance_retry_after: Duration::from_secs(60),
            max_keys_on_publish: 30,
            max_body_bytes: 64_000,
            backend_timeout: Duration::from_secs(10),
            chaff_max_delay: Duration::from_secs(2),
            chaff_latency_window: 1024,
            revision_token_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            revision_token_secret: String::new(),
            authority_secrets: HashMap::new(),
        }
    }
}

/// Minimum accepted length of the revision token secret.
pub const MIN_SECRET_LEN: usize = 16;

impl PublishConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port cannot be 0".into()));
        }

        if self.max_keys_on_publish == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_keys_on_publish cannot be 0".into(),
            ));
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::InvalidLimit("max_body_bytes cannot be 0".into()));
        }

        if self.chaff_latency_window == 0 {
            return Err(ConfigError::InvalidLimit(
                "chaff_latency_window cannot be 0".into(),
            ));
        }

        if self
            .response_padding_min_bytes
            .checked_add(self.response_padding_range)
            .is_none()
        {
            return Err(ConfigError::InvalidLimit("padding bounds overflow".into()));
        }

        if self.backend_timeout.as_millis() == 0 {
            return Err(ConfigError::InvalidTimeout(
                "backend_timeout cannot be 0".into(),
            ));
        }

        if self.revision_token_ttl.as_secs() == 0 {
            return Err(ConfigError::InvalidTimeout(
                "revision_token_ttl cannot be 0".into(),
            ));
        }

        if self.revision_token_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidSecret(format!(
                "revision_token_secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }

        Ok(())
    }

    /// Get server bind address
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Apply `EN_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("EN_HOST") {
            self.host = parse_var("EN_HOST", &v)?;
        }
        if let Some(v) = lookup("EN_PORT").or_else(|| lookup("PORT")) {
            self.port = parse_var("EN_PORT", &v)?;
        }
        if let Some(v) = lookup("EN_ENABLE_LEGACY_API") {
            self.enable_legacy_api = parse_bool("EN_ENABLE_LEGACY_API", &v)?;
        }
        if let Some(v) = lookup("EN_RESPONSE_PADDING_MIN_BYTES") {
            self.response_padding_min_bytes = parse_var("EN_RESPONSE_PADDING_MIN_BYTES", &v)?;
        }
        if let Some(v) = lookup("EN_RESPONSE_PADDING_RANGE") {
            self.response_padding_range = parse_var("EN_RESPONSE_PADDING_RANGE", &v)?;
        }
        if let Some(v) = lookup("EN_MAINTENANCE_MODE") {
            self.maintenance_mode = parse_bool("EN_MAINTENANCE_MODE", &v)?;
        }
        if let Some(v) = lookup("EN_MAINTENANCE_RETRY_AFTER") {
            self.maintenance_retry_after = parse_duration_var("EN_MAINTENANCE_RETRY_AFTER", &v)?;
        }
        if let Some(v) = lookup("EN_MAX_KEYS_ON_PUBLISH") {
            self.max_keys_on_publish = parse_var("EN_MAX_KEYS_ON_PUBLISH", &v)?;
        }
        if let Some(v) = lookup("EN_MAX_BODY_BYTES") {
            self.max_body_bytes = parse_var("EN_MAX_BODY_BYTES", &v)?;
        }
        if let Some(v) = lookup("EN_BACKEND_TIMEOUT") {
            self.backend_timeout = parse_duration_var("EN_BACKEND_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("EN_CHAFF_MAX_DELAY") {
            self.chaff_max_delay = parse_duration_var("EN_CHAFF_MAX_DELAY", &v)?;
        }
        if let Some(v) = lookup("EN_CHAFF_LATENCY_WINDOW") {
            self.chaff_latency_window = parse_var("EN_CHAFF_LATENCY_WINDOW", &v)?;
        }
        if let Some(v) = lookup("EN_REVISION_TOKEN_TTL") {
            self.revision_token_ttl = parse_duration_var("EN_REVISION_TOKEN_TTL", &v)?;
        }
        if let Some(v) = lookup("EN_REVISION_TOKEN_SECRET") {
            self.revision_token_secret = v;
        }
        if let Some(v) = lookup("EN_AUTHORITY_SECRETS") {
            self.authority_secrets = parse_authority_secrets(&v)?;
        }
        Ok(self)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}: cannot parse {:?}", name, value)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid(format!(
            "{}: expected a boolean, got {:?}",
            name, value
        ))),
    }
}

fn parse_duration_var(name: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime_serde::parse_duration(value)
        .map_err(|e| ConfigError::InvalidTimeout(format!("{}: {}", name, e)))
}

/// Parse `authority=secret,authority=secret`.
fn parse_authority_secrets(value: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut secrets = HashMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (authority, secret) = entry.split_once('=').ok_or_else(|| {
            ConfigError::InvalidSecret(format!("authority secret entry {:?} has no '='", entry))
        })?;
        if authority.trim().is_empty() || secret.trim().is_empty() {
            return Err(ConfigError::InvalidSecret(format!(
                "authority secret entry {:?} is incomplete",
                entry
            )));
        }
        secrets.insert(authority.trim().to_string(), secret.trim().to_string());
    }
    Ok(secrets)
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Missing or weak secret material
    #[error("invalid secret: {0}")]
    InvalidSecret(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be checked before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled(mins, 60).ok_or("invalid minutes")
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled(hours, 3600).ok_or("invalid hours")
        } else if let Some(days) = s.strip_suffix('d') {
            scaled(days, 86_400).ok_or("invalid days")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }

    /// `value` units of `unit_secs` seconds, `None` on bad input or overflow.
    fn scaled(value: &str, unit_secs: u64) -> Option<Duration> {
        value
            .trim()
            .parse::<u64>()
            .ok()?
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PublishConfig {
        PublishConfig {
            revision_token_secret: "0123456789abcdef0123".into(),
            ..PublishConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = PublishConfig::default();
        assert_eq!(config.port, 8080);
        assert!(config.enable_legacy_api);
        assert_eq!(config.response_padding_min_bytes, 1024);
        assert_eq!(config.response_padding_range, 1024);
        assert_eq!(config.max_keys_on_publish, 30);
        assert!(!config.maintenance_mode);
    }

    #[test]
    fn test_default_requires_secret() {
        assert!(matches!(
            PublishConfig::default().validate(),
            Err(ConfigError::InvalidSecret(_))
        ));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = valid_config();
        config.max_keys_on_publish = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimit(_))));

        let mut config = valid_config();
        config.backend_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("EN_PORT", "9999"),
            ("EN_ENABLE_LEGACY_API", "false"),
            ("EN_RESPONSE_PADDING_MIN_BYTES", "10"),
            ("EN_RESPONSE_PADDING_RANGE", "0"),
            ("EN_MAINTENANCE_MODE", "true"),
            ("EN_BACKEND_TIMEOUT", "250ms"),
            ("EN_REVISION_TOKEN_TTL", "7d"),
            ("EN_AUTHORITY_SECRETS", "com.example.app=s1, gov.region=s2"),
        ]
        .into_iter()
        .collect();

        let config = valid_config()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.port, 9999);
        assert!(!config.enable_legacy_api);
        assert_eq!(config.response_padding_min_bytes, 10);
        assert_eq!(config.response_padding_range, 0);
        assert!(config.maintenance_mode);
        assert_eq!(config.backend_timeout, Duration::from_millis(250));
        assert_eq!(config.revision_token_ttl, Duration::from_secs(7 * 86_400));
        assert_eq!(config.authority_secrets.len(), 2);
        assert_eq!(config.authority_secrets["gov.region"], "s2");
    }

    #[test]
    fn test_bad_override_is_error() {
        let result = valid_config().with_overrides(|name| {
            (name == "EN_MAINTENANCE_MODE").then(|| "sometimes".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = valid_config()
            .with_overrides(|name| (name == "EN_AUTHORITY_SECRETS").then(|| "nosecret".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidSecret(_))));
    }

    #[test]
    fn test_huge_duration_is_error() {
        assert_eq!(
            humantime_serde::parse_duration("90m"),
            Ok(Duration::from_secs(5400))
        );
        assert!(humantime_serde::parse_duration(&format!("{}d", u64::MAX / 2)).is_err());
        assert!(humantime_serde::parse_duration(&format!("{}h", u64::MAX)).is_err());

        let result = valid_config().with_overrides(|name| {
            (name == "EN_REVISION_TOKEN_TTL").then(|| "999999999999999999m".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidTimeout(_))));
    }

    #[test]
    fn test_duration_serde_roundtrip() {
        let config = valid_config();
        let json = serde_json::to_string(&config).unwrap();
        let back: PublishConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.backend_timeout, config.backend_timeout);
        assert_eq!(back.revision_token_ttl, config.revision_token_ttl);
    }
}
