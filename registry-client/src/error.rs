//! Error surface of the registry client.

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::signing::SigningEntity;
use crate::transport::TransportError;

/// Errors produced by the registry client.
///
/// The `Display` rendering of each case is part of the client contract.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The identity cannot be used with a registry.
    #[error("invalid package identity '{0}'")]
    InvalidPackageIdentity(String),

    /// A URL could not be parsed or manipulated.
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    /// No registry is configured for the requested scope.
    #[error("no registry configured for '{0}'")]
    RegistryNotConfigured(String),

    /// The download destination already exists.
    #[error("path already exists: {0}")]
    PathAlreadyExists(PathBuf),

    /// Release-list retrieval failed.
    #[error("failed retrieving releases for {package} from {registry}: {cause}")]
    FailedRetrievingReleases {
        /// Registry the request went to.
        registry: Url,
        /// Affected package.
        package: String,
        /// Underlying failure.
        #[source]
        cause: Box<RegistryError>,
    },

    /// Version-metadata retrieval failed.
    #[error("failed retrieving information about {package} {version} from {registry}: {cause}")]
    FailedRetrievingReleaseInfo {
        /// Registry the request went to.
        registry: Url,
        /// Affected package.
        package: String,
        /// Affected version.
        version: String,
        /// Underlying failure.
        #[source]
        cause: Box<RegistryError>,
    },

    /// The source-archive pipeline failed.
    #[error("failed downloading {package} {version} from {registry}: {cause}")]
    FailedDownloadingSourceArchive {
        /// Registry the request went to.
        registry: Url,
        /// Affected package.
        package: String,
        /// Affected version.
        version: String,
        /// Underlying failure.
        #[source]
        cause: Box<RegistryError>,
    },

    /// Identity lookup failed.
    #[error("failed looking up identities for {url} in {registry}: {cause}")]
    FailedIdentityLookup {
        /// Registry the request went to.
        registry: Url,
        /// Queried source-control URL.
        url: String,
        /// Underlying failure.
        #[source]
        cause: Box<RegistryError>,
    },

    /// Publishing a release failed.
    #[error("failed publishing {package} {version} to {registry}: {cause}")]
    FailedPublishing {
        /// Registry the request went to.
        registry: Url,
        /// Affected package.
        package: String,
        /// Affected version.
        version: String,
        /// Underlying failure.
        #[source]
        cause: Box<RegistryError>,
    },

    /// The HTTP transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response body or headers were malformed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The response status was outside the expected set.
    #[error("invalid response status {actual}, expected one of {expected:?}")]
    InvalidResponseStatus {
        /// Statuses the operation accepts.
        expected: Vec<u16>,
        /// Status actually returned.
        actual: u16,
    },

    /// The `Content-Version` header did not match the API version.
    #[error("invalid content version {actual:?}, expected '{expected}'")]
    InvalidContentVersion {
        /// Supported API version.
        expected: String,
        /// Version actually returned.
        actual: Option<String>,
    },

    /// The `Content-Type` header did not match the negotiated type.
    #[error("invalid content type {actual:?}, expected '{expected}'")]
    InvalidContentType {
        /// Negotiated content type.
        expected: String,
        /// Content type actually returned.
        actual: Option<String>,
    },

    /// The availability probe reported the registry down.
    #[error("registry {0} is not available")]
    RegistryNotAvailable(Url),

    /// The availability probe reported an error.
    #[error("availability check for {registry} failed: {message}")]
    AvailabilityError {
        /// Probed registry.
        registry: Url,
        /// Server-reported detail.
        message: String,
    },

    /// The registry rejected the credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// The registry refused the operation.
    #[error("forbidden")]
    Forbidden,

    /// The registry does not implement the authentication method.
    #[error("authentication method not supported by the registry")]
    AuthenticationMethodNotSupported,

    /// The registry reported a server-side failure.
    #[error("server error {code}: {details}")]
    ServerError {
        /// HTTP status code.
        code: u16,
        /// Server-reported detail.
        details: String,
    },

    /// Release metadata has no source-archive resource.
    #[error("release metadata has no source-archive resource")]
    MissingSourceArchive,

    /// The source-archive resource carries no checksum.
    #[error("source archive is missing its checksum in release metadata")]
    SourceArchiveMissingChecksum,

    /// The source archive is not signed.
    #[error("source archive is not signed")]
    SourceArchiveNotSigned,

    /// No signature format was specified.
    #[error("signature format not specified")]
    MissingSignatureFormat,

    /// The signature format label is not understood.
    #[error("unknown signature format '{0}'")]
    UnknownSignatureFormat(String),

    /// The signature does not verify over the archive.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The signing certificate failed validation.
    #[error("invalid signing certificate: {0}")]
    InvalidSigningCertificate(String),

    /// The signing certificate chains to no trusted root.
    #[error("signer is not trusted")]
    SignerNotTrusted,

    /// The detached signature could not be decoded.
    #[error("failed loading signature: {0}")]
    FailedLoadingSignature(String),

    /// The verification primitive itself failed.
    #[error("failed to validate signature: {0}")]
    FailedToValidateSignature(String),

    /// The archive checksum differs from the recorded fingerprint.
    #[error("checksum '{latest}' does not match previously recorded '{previous}'")]
    ChecksumChanged {
        /// Checksum observed now.
        latest: String,
        /// Checksum recorded on first use.
        previous: String,
    },

    /// The archive checksum differs from the one declared in metadata.
    #[error("invalid archive checksum '{actual}', expected '{expected}'")]
    InvalidChecksum {
        /// Checksum declared in release metadata.
        expected: String,
        /// Checksum computed over the download.
        actual: String,
    },

    /// The package is now signed by a different entity.
    #[error("signing entity for {package} changed from '{previous}' to '{latest}'")]
    SigningEntityForPackageChanged {
        /// Affected package.
        package: String,
        /// Entity observed now.
        latest: SigningEntity,
        /// Entity recorded on first use.
        previous: SigningEntity,
    },

    /// A release is now signed by a different entity.
    #[error("signing entity for {package} {version} changed from '{previous}' to '{latest}'")]
    SigningEntityForReleaseChanged {
        /// Affected package.
        package: String,
        /// Affected version.
        version: String,
        /// Entity observed now.
        latest: SigningEntity,
        /// Entity recorded on first use.
        previous: SigningEntity,
    },

    /// The registry knows no such package.
    #[error("package not found")]
    PackageNotFound,

    /// The registry knows no such package version.
    #[error("package version not found")]
    PackageVersionNotFound,

    /// A 202 publish response carried no `Location` header.
    #[error("response from registry is missing the publishing location")]
    MissingPublishingLocation,

    /// A required collaborator or policy is not configured.
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),

    /// A filesystem operation failed.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}
