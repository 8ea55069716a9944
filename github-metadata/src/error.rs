//! Error surface of the metadata provider.

use thiserror::Error;

/// Errors produced by the metadata provider.
#[derive(Debug, Error)]
pub enum GithubMetadataError {
    /// The source-control URL is not of the `host[:/ ]owner/repo` shape.
    #[error("invalid source-control URL '{0}'")]
    InvalidGitUrl(String),

    /// The API rate limit is exhausted.
    #[error("GitHub API rate limit exceeded (limit {limit})")]
    ApiLimitsExceeded {
        /// Advertised request budget.
        limit: u64,
    },

    /// The configured token was rejected.
    #[error("invalid authentication token")]
    InvalidAuthToken,

    /// The repository is not accessible to this client.
    #[error("permission denied")]
    PermissionDenied,

    /// The repository does not exist.
    #[error("repository not found")]
    NotFound,

    /// The response body or status was malformed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The host accumulated too many errors and is cooling down.
    #[error("host {0} is failing, circuit breaker open")]
    CircuitOpen(String),

    /// The HTTP stack failed.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The disk cache failed.
    #[error("cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    /// A filesystem operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
