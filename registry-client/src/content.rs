//! Content negotiation for the v1 registry API.

use crate::error::RegistryError;
use crate::transport::Headers;

/// API version understood by this client.
pub static API_VERSION: &str = "1";

/// `Content-Type` of RFC 7807 problem bodies.
pub static PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Media types negotiated with the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaType {
    /// JSON payloads (metadata, identifiers).
    Json,
    /// Manifest sources.
    Swift,
    /// Source archives.
    Zip,
}

impl MediaType {
    /// `Accept` header value for this media type.
    pub fn accept(&self) -> String {
        format!(
            "application/vnd.swift.registry.v{}+{}",
            API_VERSION,
            self.suffix()
        )
    }

    /// Expected response `Content-Type` for this media type.
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::Swift => "text/x-swift",
            MediaType::Zip => "application/zip",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            MediaType::Json => "json",
            MediaType::Swift => "swift",
            MediaType::Zip => "zip",
        }
    }
}

/// Check the `Content-Version` header against the supported API version.
///
/// In optional mode an absent header passes; a mismatching one never does.
pub fn validate_api_version(headers: &Headers, is_optional: bool) -> Result<(), RegistryError> {
    match headers.get("Content-Version") {
        Some(actual) if actual == API_VERSION => Ok(()),
        Some(actual) => Err(RegistryError::InvalidContentVersion {
            expected: API_VERSION.to_string(),
            actual: Some(actual.to_string()),
        }),
        None if is_optional => Ok(()),
        None => Err(RegistryError::InvalidContentVersion {
            expected: API_VERSION.to_string(),
            actual: None,
        }),
    }
}

/// Check the `Content-Type` header equals `expected`, or starts with
/// `expected` followed by parameters.
pub fn validate_content_type(headers: &Headers, expected: &str) -> Result<(), RegistryError> {
    let actual = headers.get("Content-Type");
    match actual {
        Some(value) if value == expected || value.starts_with(&format!("{};", expected)) => Ok(()),
        _ => Err(RegistryError::InvalidContentType {
            expected: expected.to_string(),
            actual: actual.map(str::to_string),
        }),
    }
}
