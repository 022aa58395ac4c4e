//! Wire schemas and the request/response envelopes the handlers work with.

pub mod bridge;
pub mod v1;
pub mod v1alpha1;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::error::PublishError;
use crate::domain::padding::Padding;

pub use bridge::VersionBridge;

/// Response header naming the schema version that produced the body.
pub const HEADER_API_VERSION: &str = "x-api-version";

/// Publish schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    V1,
    V1Alpha1,
}

impl ApiVersion {
    pub fn header_value(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V1Alpha1 => "v1alpha",
        }
    }
}

/// An endpoint family. Middleware uses it to synthesize responses of the
/// right shape without reaching the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Publish(ApiVersion),
    Stats,
}

impl Surface {
    /// Render a batch-level failure.
    pub fn error_response(&self, err: &PublishError, padding: Option<Padding>) -> Response {
        match self {
            Self::Publish(version) => {
                let mut response = v1::PublishResponse::from_error(err);
                response.padding = padding;
                PublishReply::new(*version, response, None).render(err.status())
            }
            Self::Stats => {
                let mut response = v1::StatsResponse::from_error(err);
                response.padding = padding;
                render_json(err.status(), ApiVersion::V1, &response)
            }
        }
    }

    /// Render a well-formed success response carrying no real data.
    pub fn decoy_response(&self, revision_token: String, padding: Option<Padding>) -> Response {
        match self {
            Self::Publish(version) => {
                let response = v1::PublishResponse {
                    revision_token,
                    padding,
                    ..v1::PublishResponse::default()
                };
                PublishReply::new(*version, response, None).render(StatusCode::OK)
            }
            Self::Stats => {
                let response = v1::StatsResponse {
                    padding,
                    ..v1::StatsResponse::default()
                };
                render_json(StatusCode::OK, ApiVersion::V1, &response)
            }
        }
    }
}

/// A decoded publish request in either schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishEnvelope {
    Canonical(v1::Publish),
    Legacy(v1alpha1::Publish),
}

impl PublishEnvelope {
    pub fn decode(
        version: ApiVersion,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Self, PublishError> {
        match version {
            ApiVersion::V1 => decode_json(headers, body).map(Self::Canonical),
            ApiVersion::V1Alpha1 => decode_json(headers, body).map(Self::Legacy),
        }
    }

    /// Canonical request plus the bridge needed to answer a legacy caller.
    pub fn into_canonical(self) -> (v1::Publish, Option<VersionBridge>) {
        match self {
            Self::Canonical(request) => (request, None),
            Self::Legacy(request) => {
                let (request, bridge) = VersionBridge::upconvert(request);
                (request, Some(bridge))
            }
        }
    }
}

/// A publish response in the caller's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishReply {
    Canonical(v1::PublishResponse),
    Legacy(v1alpha1::PublishResponse),
}

impl PublishReply {
    /// Shape `response` for `version`, downconverting through `bridge` for
    /// legacy callers.
    pub fn new(
        version: ApiVersion,
        response: v1::PublishResponse,
        bridge: Option<&VersionBridge>,
    ) -> Self {
        match version {
            ApiVersion::V1 => Self::Canonical(response),
            ApiVersion::V1Alpha1 => match bridge {
                Some(bridge) => Self::Legacy(bridge.downconvert(response)),
                None => Self::Legacy(VersionBridge::default().downconvert(response)),
            },
        }
    }

    pub fn version(&self) -> ApiVersion {
        match self {
            Self::Canonical(_) => ApiVersion::V1,
            Self::Legacy(_) => ApiVersion::V1Alpha1,
        }
    }

    pub fn render(&self, status: StatusCode) -> Response {
        match self {
            Self::Canonical(body) => render_json(status, self.version(), body),
            Self::Legacy(body) => render_json(status, self.version(), body),
        }
    }
}

/// Decode a JSON body after checking its content type.
pub fn decode_json<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8]) -> Result<T, PublishError> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .eq_ignore_ascii_case("application/json")
        })
        .unwrap_or(false);
    if !is_json {
        return Err(PublishError::UnsupportedContentType);
    }

    serde_json::from_slice(body).map_err(|e| PublishError::Malformed(e.to_string()))
}

pub(crate) fn render_json<T: Serialize>(
    status: StatusCode,
    version: ApiVersion,
    body: &T,
) -> Response {
    (
        status,
        [(HEADER_API_VERSION, version.header_value())],
        Json(body),
    )
        .into_response()
}
