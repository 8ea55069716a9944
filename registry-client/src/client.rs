//! Client to make outgoing API requests to package registries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use semver::Version;
use url::Url;

use crate::cache::{AvailabilityCache, MetadataCache, MetadataCacheKey};
use crate::content::{
    validate_api_version, validate_content_type, MediaType, PROBLEM_CONTENT_TYPE,
};
use crate::error::RegistryError;
use crate::fs::{ArchiveExtractor, FileSystem, LocalFileSystem};
use crate::identity::{PackageIdentity, RegistryIdentity};
use crate::links::{parse_alternate_manifests, parse_alternative_locations};
use crate::metadata::{
    tools_version_from_manifest, wire, ManifestDescriptor, PackageMetadata,
    PackageVersionMetadata, ToolsVersion,
};
use crate::publish::build_publish_body;
use crate::registry::{
    RegistriesSettings, Registry, RegistryConfiguration, DEFAULT_AVAILABILITY_TTL_SECS,
    DEFAULT_METADATA_TTL_SECS,
};
use crate::signing::{
    RegistryClientDelegate, SignatureFormat, SignatureVerifier, SigningPolicy,
    VerifierConfiguration,
};
use crate::stores::{
    FingerprintStore, InMemoryFingerprintStore, InMemorySigningEntityStore, SigningEntityStore,
};
use crate::tofu::TofuPolicy;
use crate::transport::{HttpTransport, Method, Request, ReqwestTransport, Response};

/// Result of a publish request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishResult {
    /// The release is live.
    Published {
        /// Location of the published release, when reported.
        location: Option<Url>,
    },
    /// The registry accepted the release for asynchronous processing.
    Processing {
        /// Where to poll for progress.
        status_url: Url,
        /// Suggested poll delay, seconds.
        retry_after: Option<u64>,
    },
}

/// Client for the v1 package-registry API.
///
/// Cheap to clone; clones share transport, caches, and stores.
#[derive(Clone)]
pub struct RegistryClient {
    pub(crate) configuration: RegistryConfiguration,
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) filesystem: Arc<dyn FileSystem>,
    pub(crate) extractor: Option<Arc<dyn ArchiveExtractor>>,
    pub(crate) fingerprints: Arc<dyn FingerprintStore>,
    pub(crate) signing_entities: Arc<dyn SigningEntityStore>,
    pub(crate) verifier: Option<Arc<dyn SignatureVerifier>>,
    pub(crate) verifier_configuration: VerifierConfiguration,
    pub(crate) delegate: Option<Arc<dyn RegistryClientDelegate>>,
    pub(crate) signing_policy: SigningPolicy,
    pub(crate) tofu_policy: TofuPolicy,
    pub(crate) auth_tokens: HashMap<Url, String>,
    pub(crate) availability_cache: Arc<AvailabilityCache>,
    pub(crate) metadata_cache: Arc<MetadataCache>,
}

impl RegistryClient {
    /// Return a client builder for `configuration`.
    pub fn builder(configuration: RegistryConfiguration) -> RegistryClientBuilder {
        RegistryClientBuilder::new(configuration)
    }

    /// Abort in-flight requests and refuse to start new ones.
    ///
    /// Cancellation is cooperative: operations observe the abort as a
    /// transport error.
    pub fn cancel(&self) {
        self.transport.cancel();
    }

    /// Resolve `package` to its registry identity and responsible
    /// registry, before any network I/O.
    pub(crate) fn resolve(
        &self,
        package: &PackageIdentity,
    ) -> Result<(RegistryIdentity, Registry), RegistryError> {
        let identity = package
            .registry_identity()
            .ok_or_else(|| RegistryError::InvalidPackageIdentity(package.to_string()))?;
        let registry = self
            .configuration
            .registry(identity.scope())
            .ok_or_else(|| RegistryError::RegistryNotConfigured(identity.scope().to_string()))?
            .clone();
        Ok((identity, registry))
    }

    /// Build a request with the negotiated accept header and, when
    /// configured, a bearer token for the target registry.
    pub(crate) fn new_request(
        &self,
        method: Method,
        url: Url,
        accept: Option<MediaType>,
        timeout: Option<Duration>,
    ) -> Request {
        let mut request = Request::new(method, url.clone());
        if let Some(media_type) = accept {
            request = request.header("Accept", media_type.accept());
        }
        if let Some(token) = self.token_for(&url) {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        request
    }

    fn token_for(&self, url: &Url) -> Option<&str> {
        self.auth_tokens
            .iter()
            .find(|(base, _)| url.as_str().starts_with(base.as_str()))
            .map(|(_, token)| token.as_str())
    }

    /// Map a response outside the expected status set onto an error.
    ///
    /// A parseable problem body wins; well-known statuses come next.
    pub(crate) fn unexpected_status(expected: &[u16], response: &Response) -> RegistryError {
        if let Some(problem) = decode_problem(response) {
            return RegistryError::ServerError {
                code: response.status,
                details: problem.detail.unwrap_or_default(),
            };
        }
        match response.status {
            401 => RegistryError::Unauthorized,
            403 => RegistryError::Forbidden,
            501 => RegistryError::AuthenticationMethodNotSupported,
            500 | 502 | 503 => RegistryError::ServerError {
                code: response.status,
                details: "internal server error".to_string(),
            },
            actual => RegistryError::InvalidResponseStatus {
                expected: expected.to_vec(),
                actual,
            },
        }
    }

    /// List the releases of `package`, newest first.
    ///
    /// Releases carrying a problem (e.g. yanked) are filtered out.
    pub async fn get_package_metadata(
        &self,
        package: &PackageIdentity,
        timeout: Option<Duration>,
    ) -> Result<PackageMetadata, RegistryError> {
        let (identity, registry) = self.resolve(package)?;
        self.ensure_available(&registry, timeout).await?;

        let url = join_url(
            &registry.url,
            &[identity.scope().as_str(), identity.name().as_str()],
        )?;
        trace!("fetching releases of {} from {}", identity, url);
        let request = self.new_request(Method::Get, url, Some(MediaType::Json), timeout);

        let outcome = async {
            let response = self.transport.execute(request).await?;
            match response.status {
                200 => {
                    validate_api_version(&response.headers, false)?;
                    validate_content_type(&response.headers, MediaType::Json.content_type())?;

                    let releases: wire::Releases =
                        serde_json::from_slice(&response.body).map_err(|e| {
                            RegistryError::InvalidResponse(format!(
                                "failed decoding releases: {}",
                                e
                            ))
                        })?;

                    let mut versions = Vec::with_capacity(releases.releases.len());
                    for (raw, release) in releases.releases {
                        if release.problem.is_some() {
                            debug!("skipping unavailable release {} of {}", raw, identity);
                            continue;
                        }
                        match Version::parse(&raw) {
                            Ok(version) => versions.push(version),
                            Err(e) => {
                                warn!("ignoring unparseable version '{}' of {}: {}", raw, identity, e)
                            }
                        }
                    }
                    versions.sort_by(|a, b| b.cmp(a));

                    let alternate_locations = response
                        .headers
                        .get("Link")
                        .map(parse_alternative_locations)
                        .unwrap_or_default();

                    Ok(PackageMetadata {
                        registry: registry.clone(),
                        versions,
                        alternate_locations,
                    })
                }
                404 => Err(RegistryError::PackageNotFound),
                _ => Err(Self::unexpected_status(&[200], &response)),
            }
        }
        .await;

        outcome.map_err(|cause| match cause {
            e @ RegistryError::PackageNotFound => e,
            cause => RegistryError::FailedRetrievingReleases {
                registry: registry.url.clone(),
                package: identity.to_string(),
                cause: Box::new(cause),
            },
        })
    }

    /// Fetch metadata for `package` at `version`.
    pub async fn get_package_version_metadata(
        &self,
        package: &PackageIdentity,
        version: &Version,
        timeout: Option<Duration>,
    ) -> Result<PackageVersionMetadata, RegistryError> {
        let (identity, registry) = self.resolve(package)?;
        let metadata = self
            .raw_version_metadata(&registry, &identity, version, timeout)
            .await?;
        Ok(PackageVersionMetadata::from_wire(registry, &metadata))
    }

    /// Fetch the wire form of version metadata, serving the cache within
    /// its TTL.
    pub(crate) async fn raw_version_metadata(
        &self,
        registry: &Registry,
        identity: &RegistryIdentity,
        version: &Version,
        timeout: Option<Duration>,
    ) -> Result<wire::VersionMetadata, RegistryError> {
        let key = MetadataCacheKey {
            registry: registry.url.clone(),
            package: identity.clone(),
            version: version.clone(),
        };
        if let Some(cached) = self.metadata_cache.get(&key).await {
            trace!("serving metadata of {} {} from cache", identity, version);
            return Ok(cached);
        }

        self.ensure_available(registry, timeout).await?;

        let url = join_url(
            &registry.url,
            &[
                identity.scope().as_str(),
                identity.name().as_str(),
                &version.to_string(),
            ],
        )?;
        trace!("fetching metadata of {} {} from {}", identity, version, url);
        let request = self.new_request(Method::Get, url, Some(MediaType::Json), timeout);

        let outcome = async {
            let response = self.transport.execute(request).await?;
            match response.status {
                200 => {
                    validate_api_version(&response.headers, false)?;
                    validate_content_type(&response.headers, MediaType::Json.content_type())?;

                    let metadata: wire::VersionMetadata = serde_json::from_slice(&response.body)
                        .map_err(|e| {
                            RegistryError::InvalidResponse(format!(
                                "failed decoding version metadata: {}",
                                e
                            ))
                        })?;

                    self.metadata_cache.put(key, metadata.clone()).await;
                    Ok(metadata)
                }
                404 => Err(RegistryError::PackageVersionNotFound),
                _ => Err(Self::unexpected_status(&[200], &response)),
            }
        }
        .await;

        outcome.map_err(|cause| match cause {
            e @ RegistryError::PackageVersionNotFound => e,
            cause => RegistryError::FailedRetrievingReleaseInfo {
                registry: registry.url.clone(),
                package: identity.to_string(),
                version: version.to_string(),
                cause: Box::new(cause),
            },
        })
    }

    /// List the manifests available for `package` at `version`.
    ///
    /// The first descriptor is the default manifest with its content;
    /// alternates advertised via `Link` follow without content.
    pub async fn get_available_manifests(
        &self,
        package: &PackageIdentity,
        version: &Version,
        timeout: Option<Duration>,
    ) -> Result<Vec<ManifestDescriptor>, RegistryError> {
        let (identity, registry) = self.resolve(package)?;
        self.ensure_available(&registry, timeout).await?;

        let url = join_url(
            &registry.url,
            &[
                identity.scope().as_str(),
                identity.name().as_str(),
                &version.to_string(),
                "Package.swift",
            ],
        )?;
        let request = self.new_request(Method::Get, url, Some(MediaType::Swift), timeout);

        let outcome = async {
            let response = self.transport.execute(request).await?;
            match response.status {
                200 => {
                    validate_api_version(&response.headers, false)?;
                    validate_content_type(&response.headers, MediaType::Swift.content_type())?;

                    let content = String::from_utf8(response.body.clone()).map_err(|_| {
                        RegistryError::InvalidResponse("manifest is not valid UTF-8".to_string())
                    })?;
                    if content.is_empty() {
                        return Err(RegistryError::InvalidResponse(
                            "empty manifest in response".to_string(),
                        ));
                    }

                    let tools_version = tools_version_from_manifest(&content);
                    if tools_version.is_none() {
                        warn!(
                            "manifest of {} {} carries no tools-version comment",
                            identity, version
                        );
                    }

                    let mut manifests = vec![ManifestDescriptor {
                        filename: "Package.swift".to_string(),
                        tools_version,
                        content: Some(content),
                    }];
                    if let Some(link) = response.headers.get("Link") {
                        for alternate in parse_alternate_manifests(link)? {
                            manifests.push(ManifestDescriptor {
                                filename: alternate.filename,
                                tools_version: Some(alternate.tools_version),
                                content: None,
                            });
                        }
                    }
                    Ok(manifests)
                }
                404 => Err(RegistryError::PackageVersionNotFound),
                _ => Err(Self::unexpected_status(&[200], &response)),
            }
        }
        .await;

        outcome.map_err(|cause| match cause {
            e @ RegistryError::PackageVersionNotFound => e,
            cause => RegistryError::FailedRetrievingReleaseInfo {
                registry: registry.url.clone(),
                package: identity.to_string(),
                version: version.to_string(),
                cause: Box::new(cause),
            },
        })
    }

    /// Fetch the manifest source for `package` at `version`, optionally
    /// the variant for a specific tools version.
    pub async fn get_manifest_content(
        &self,
        package: &PackageIdentity,
        version: &Version,
        tools_version: Option<ToolsVersion>,
        timeout: Option<Duration>,
    ) -> Result<String, RegistryError> {
        let (identity, registry) = self.resolve(package)?;
        self.ensure_available(&registry, timeout).await?;

        let mut url = join_url(
            &registry.url,
            &[
                identity.scope().as_str(),
                identity.name().as_str(),
                &version.to_string(),
                "Package.swift",
            ],
        )?;
        if let Some(tools_version) = tools_version {
            url.query_pairs_mut()
                .append_pair("swift-version", &tools_version.to_string());
        }
        let request = self.new_request(Method::Get, url, Some(MediaType::Swift), timeout);

        let outcome = async {
            let response = self.transport.execute(request).await?;
            match response.status {
                200 => {
                    validate_api_version(&response.headers, false)?;
                    validate_content_type(&response.headers, MediaType::Swift.content_type())?;

                    String::from_utf8(response.body).map_err(|_| {
                        RegistryError::InvalidResponse("manifest is not valid UTF-8".to_string())
                    })
                }
                404 => Err(RegistryError::PackageVersionNotFound),
                _ => Err(Self::unexpected_status(&[200], &response)),
            }
        }
        .await;

        outcome.map_err(|cause| match cause {
            e @ RegistryError::PackageVersionNotFound => e,
            cause => RegistryError::FailedRetrievingReleaseInfo {
                registry: registry.url.clone(),
                package: identity.to_string(),
                version: version.to_string(),
                cause: Box::new(cause),
            },
        })
    }

    /// Find package identities known for the repository at `scm_url`.
    ///
    /// A 404 means "no identities" and yields an empty set.
    pub async fn lookup_identities(
        &self,
        scm_url: &Url,
        timeout: Option<Duration>,
    ) -> Result<HashSet<PackageIdentity>, RegistryError> {
        let registry = self
            .configuration
            .default_registry
            .clone()
            .ok_or_else(|| RegistryError::RegistryNotConfigured("(default)".to_string()))?;
        self.ensure_available(&registry, timeout).await?;

        let mut url = join_url(&registry.url, &["identifiers"])?;
        url.query_pairs_mut().append_pair("url", scm_url.as_str());
        let request = self.new_request(Method::Get, url, Some(MediaType::Json), timeout);

        let outcome = async {
            let response = self.transport.execute(request).await?;
            match response.status {
                200 => {
                    validate_api_version(&response.headers, false)?;
                    validate_content_type(&response.headers, MediaType::Json.content_type())?;

                    let identifiers: wire::Identifiers = serde_json::from_slice(&response.body)
                        .map_err(|e| {
                            RegistryError::InvalidResponse(format!(
                                "failed decoding identifiers: {}",
                                e
                            ))
                        })?;
                    Ok(identifiers
                        .identifiers
                        .into_iter()
                        .map(PackageIdentity::new)
                        .collect())
                }
                // "no identities" is a valid answer here.
                404 => Ok(HashSet::new()),
                _ => Err(Self::unexpected_status(&[200], &response)),
            }
        }
        .await;

        outcome.map_err(|cause| RegistryError::FailedIdentityLookup {
            registry: registry.url.clone(),
            url: scm_url.to_string(),
            cause: Box::new(cause),
        })
    }

    /// Authenticate against `login_url`.
    pub async fn login(&self, login_url: &Url, timeout: Option<Duration>) -> Result<(), RegistryError> {
        let request = self.new_request(Method::Post, login_url.clone(), None, timeout);
        let response = self.transport.execute(request).await?;
        match response.status {
            200 => Ok(()),
            _ => Err(Self::unexpected_status(&[200], &response)),
        }
    }

    /// Publish a release; the registry may process it asynchronously.
    #[allow(clippy::too_many_arguments)]
    pub async fn publish(
        &self,
        package: &PackageIdentity,
        version: &Version,
        archive: Vec<u8>,
        archive_signature: Option<Vec<u8>>,
        signature_format: Option<SignatureFormat>,
        metadata: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<PublishResult, RegistryError> {
        let (identity, registry) = self.resolve(package)?;

        // Encode before any network I/O; a signature without a declared
        // format must fail locally.
        let body = build_publish_body(
            &archive,
            archive_signature.as_deref(),
            signature_format,
            metadata.as_ref(),
        )?;

        self.ensure_available(&registry, timeout).await?;

        let url = join_url(
            &registry.url,
            &[
                identity.scope().as_str(),
                identity.name().as_str(),
                &version.to_string(),
            ],
        )?;
        let mut request = self
            .new_request(Method::Put, url, Some(MediaType::Json), timeout)
            .header(
                "Content-Type",
                format!("multipart/form-data;boundary=\"{}\"", body.boundary),
            )
            .header("Expect", "100-continue")
            .header("Prefer", "respond-async");
        if archive_signature.is_some() {
            if let Some(format) = signature_format {
                request = request.header("X-Swift-Package-Signature-Format", format.label());
            }
        }
        let request = request.body(body.bytes);

        let outcome = async {
            let response = self.transport.execute(request).await?;
            match response.status {
                201 => Ok(PublishResult::Published {
                    location: response
                        .headers
                        .get("Location")
                        .and_then(|location| Url::parse(location).ok()),
                }),
                202 => {
                    let location = response
                        .headers
                        .get("Location")
                        .ok_or(RegistryError::MissingPublishingLocation)?;
                    let status_url = Url::parse(location)
                        .map_err(|_| RegistryError::InvalidUrl(location.to_string()))?;
                    let retry_after = response
                        .headers
                        .get("Retry-After")
                        .and_then(|value| value.parse().ok());
                    Ok(PublishResult::Processing {
                        status_url,
                        retry_after,
                    })
                }
                _ => Err(Self::unexpected_status(&[201, 202], &response)),
            }
        }
        .await;

        outcome.map_err(|cause| match cause {
            e @ RegistryError::MissingPublishingLocation => e,
            cause => RegistryError::FailedPublishing {
                registry: registry.url.clone(),
                package: identity.to_string(),
                version: version.to_string(),
                cause: Box::new(cause),
            },
        })
    }
}

/// Decode an `application/problem+json` body, if the response carries one.
pub(crate) fn decode_problem(response: &Response) -> Option<wire::Problem> {
    let content_type = response.headers.get("Content-Type")?;
    if content_type != PROBLEM_CONTENT_TYPE
        && !content_type.starts_with(&format!("{};", PROBLEM_CONTENT_TYPE))
    {
        return None;
    }
    serde_json::from_slice(&response.body).ok()
}

/// Join path segments onto a base URL, percent-encoding each segment.
pub(crate) fn join_url(base: &Url, segments: &[&str]) -> Result<Url, RegistryError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| RegistryError::InvalidUrl(base.to_string()))?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

/// Builder for [`RegistryClient`] with default collaborators.
pub struct RegistryClientBuilder {
    configuration: RegistryConfiguration,
    transport: Option<Arc<dyn HttpTransport>>,
    filesystem: Option<Arc<dyn FileSystem>>,
    extractor: Option<Arc<dyn ArchiveExtractor>>,
    fingerprints: Option<Arc<dyn FingerprintStore>>,
    signing_entities: Option<Arc<dyn SigningEntityStore>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    verifier_configuration: VerifierConfiguration,
    delegate: Option<Arc<dyn RegistryClientDelegate>>,
    signing_policy: SigningPolicy,
    tofu_policy: TofuPolicy,
    auth_tokens: HashMap<Url, String>,
    availability_ttl: Duration,
    metadata_ttl: Duration,
}

impl RegistryClientBuilder {
    /// A builder preconfigured from deserialized settings: registry
    /// mapping, credentials, and cache TTLs all come from the settings
    /// file rather than compiled-in defaults.
    pub fn from_settings(settings: &RegistriesSettings) -> anyhow::Result<Self> {
        let (configuration, tokens) = settings.to_configuration()?;
        Ok(Self::new(configuration)
            .auth_tokens(tokens)
            .availability_ttl(Duration::from_secs(settings.availability_ttl_secs))
            .metadata_ttl(Duration::from_secs(settings.metadata_ttl_secs)))
    }

    /// A builder with default collaborators for `configuration`.
    pub fn new(configuration: RegistryConfiguration) -> Self {
        Self {
            configuration,
            transport: None,
            filesystem: None,
            extractor: None,
            fingerprints: None,
            signing_entities: None,
            verifier: None,
            verifier_configuration: VerifierConfiguration::default(),
            delegate: None,
            signing_policy: SigningPolicy::default(),
            tofu_policy: TofuPolicy::default(),
            auth_tokens: HashMap::new(),
            availability_ttl: Duration::from_secs(DEFAULT_AVAILABILITY_TTL_SECS),
            metadata_ttl: Duration::from_secs(DEFAULT_METADATA_TTL_SECS),
        }
    }

    /// Set (or reset) the HTTP transport to use.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set (or reset) the filesystem collaborator.
    pub fn filesystem(mut self, filesystem: Arc<dyn FileSystem>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    /// Set the archive extractor used by downloads.
    pub fn archive_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Set the persistent fingerprint store.
    pub fn fingerprint_store(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.fingerprints = Some(store);
        self
    }

    /// Set the persistent signing-entity store.
    pub fn signing_entity_store(mut self, store: Arc<dyn SigningEntityStore>) -> Self {
        self.signing_entities = Some(store);
        self
    }

    /// Set the signature-verification primitive.
    pub fn signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Set the configuration handed to the signature verifier.
    pub fn verifier_configuration(mut self, configuration: VerifierConfiguration) -> Self {
        self.verifier_configuration = configuration;
        self
    }

    /// Set the delegate answering interactive trust prompts.
    pub fn delegate(mut self, delegate: Arc<dyn RegistryClientDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Set the signing policy.
    pub fn signing_policy(mut self, policy: SigningPolicy) -> Self {
        self.signing_policy = policy;
        self
    }

    /// Set the trust-on-first-use policy.
    pub fn tofu_policy(mut self, policy: TofuPolicy) -> Self {
        self.tofu_policy = policy;
        self
    }

    /// Set bearer tokens, keyed by registry base URL.
    pub fn auth_tokens(mut self, tokens: HashMap<Url, String>) -> Self {
        self.auth_tokens = tokens;
        self
    }

    /// Override the availability cache TTL.
    pub fn availability_ttl(mut self, ttl: Duration) -> Self {
        self.availability_ttl = ttl;
        self
    }

    /// Override the version-metadata cache TTL.
    pub fn metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    /// Build a client with the specified parameters.
    pub fn build(self) -> anyhow::Result<RegistryClient> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        Ok(RegistryClient {
            configuration: self.configuration,
            transport,
            filesystem: self
                .filesystem
                .unwrap_or_else(|| Arc::new(LocalFileSystem)),
            extractor: self.extractor,
            fingerprints: self
                .fingerprints
                .unwrap_or_else(|| Arc::new(InMemoryFingerprintStore::new())),
            signing_entities: self
                .signing_entities
                .unwrap_or_else(|| Arc::new(InMemorySigningEntityStore::new())),
            verifier: self.verifier,
            verifier_configuration: self.verifier_configuration,
            delegate: self.delegate,
            signing_policy: self.signing_policy,
            tofu_policy: self.tofu_policy,
            auth_tokens: self.auth_tokens,
            availability_cache: Arc::new(AvailabilityCache::new(self.availability_ttl)),
            metadata_cache: Arc::new(MetadataCache::new(self.metadata_ttl)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::AlternativeLocationKind;
    use pretty_assertions::assert_eq;

    // Each test uses its own base path (or scope) so the shared mock
    // server never sees colliding routes across parallel tests.
    fn client_at(base: &str, supports_availability: bool) -> RegistryClient {
        let registry = Registry {
            url: Url::parse(&format!("{}{}", mockito::server_url(), base)).unwrap(),
            supports_availability,
        };
        RegistryClient::builder(RegistryConfiguration {
            default_registry: Some(registry),
            scoped_registries: HashMap::new(),
        })
        .build()
        .unwrap()
    }

    fn client(supports_availability: bool) -> RegistryClient {
        client_at("", supports_availability)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_identity_fails_before_any_request() {
        let client = client(false);
        let package = PackageIdentity::new("not-a-registry-identity");

        let result = client.get_package_metadata(&package, None).await;
        assert!(matches!(
            result,
            Err(RegistryError::InvalidPackageIdentity(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unconfigured_scope_fails_before_any_request() {
        let client = RegistryClient::builder(RegistryConfiguration::default())
            .build()
            .unwrap();
        let package = PackageIdentity::new("mona.LinkedList");

        let result = client.get_package_metadata(&package, None).await;
        assert!(matches!(result, Err(RegistryError::RegistryNotConfigured(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn package_metadata_filters_problems_and_sorts_descending() {
        let _m = mockito::mock("GET", "/s1meta/LinkedList")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("content-version", "1")
            .with_header(
                "link",
                r#"<https://a>; rel="canonical", <ssh://b>; rel="alternate""#,
            )
            .with_body(
                r#"{"releases":{"1.0.0":{"url":"https://r/s1meta/LinkedList/1.0.0"},"1.1.0":{"url":"https://r/s1meta/LinkedList/1.1.0"},"2.0.0-beta":{"problem":{"status":410,"detail":"gone"}}}}"#,
            )
            .create();

        let client = client(false);
        let package = PackageIdentity::new("s1meta.LinkedList");
        let metadata = client.get_package_metadata(&package, None).await.unwrap();

        assert_eq!(
            metadata.versions,
            vec![
                Version::parse("1.1.0").unwrap(),
                Version::parse("1.0.0").unwrap()
            ]
        );
        assert_eq!(metadata.alternate_locations.len(), 2);
        assert_eq!(
            metadata.alternate_locations[0].kind,
            AlternativeLocationKind::Canonical
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn package_metadata_maps_404() {
        let _m = mockito::mock("GET", "/absent/Package")
            .with_status(404)
            .create();

        let client = client(false);
        let package = PackageIdentity::new("absent.Package");
        let result = client.get_package_metadata(&package, None).await;

        assert!(matches!(result, Err(RegistryError::PackageNotFound)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wrong_content_version_is_wrapped() {
        let _m = mockito::mock("GET", "/badver/Package")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("content-version", "2")
            .with_body("{\"releases\":{}}")
            .create();

        let client = client(false);
        let package = PackageIdentity::new("badver.Package");
        let result = client.get_package_metadata(&package, None).await;

        match result {
            Err(RegistryError::FailedRetrievingReleases { cause, .. }) => {
                assert!(matches!(
                    *cause,
                    RegistryError::InvalidContentVersion { .. }
                ));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn availability_probe_is_cached_across_operations() {
        commons::testing::init_logger();

        let probe = mockito::mock("GET", "/regcache/availability")
            .with_status(200)
            .expect(1)
            .create();
        let _m = mockito::mock("GET", "/regcache/s6avail/Package")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("content-version", "1")
            .with_body("{\"releases\":{}}")
            .expect(2)
            .create();

        let client = client_at("/regcache", true);
        let package = PackageIdentity::new("s6avail.Package");
        client.get_package_metadata(&package, None).await.unwrap();
        client.get_package_metadata(&package, None).await.unwrap();

        probe.assert();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unavailable_registry_short_circuits_operations() {
        let probe = mockito::mock("GET", "/reggone/availability")
            .with_status(404)
            .expect(1)
            .create();
        let operation = mockito::mock("GET", "/reggone/gone/Package")
            .with_status(200)
            .expect(0)
            .create();

        let client = client_at("/reggone", true);
        let package = PackageIdentity::new("gone.Package");

        for _ in 0..2 {
            let result = client.get_package_metadata(&package, None).await;
            assert!(matches!(result, Err(RegistryError::RegistryNotAvailable(_))));
        }

        probe.assert();
        operation.assert();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn availability_error_carries_problem_detail() {
        let _probe = mockito::mock("GET", "/regerr/availability")
            .with_status(500)
            .with_header("content-type", "application/problem+json")
            .with_body(r#"{"detail":"under maintenance"}"#)
            .create();

        let client = client_at("/regerr", true);
        let registry = client.configuration.default_registry.clone().unwrap();
        let status = client.check_availability(&registry, None).await.unwrap();

        assert_eq!(
            status,
            crate::availability::AvailabilityStatus::Error("under maintenance".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn configured_ttls_reach_the_caches() {
        use std::str::FromStr;

        let probe = mockito::mock("GET", "/regttl/availability")
            .with_status(200)
            .expect(2)
            .create();
        let endpoint = mockito::mock("GET", "/regttl/ttl/Package/1.2.3")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("content-version", "1")
            .with_body(r#"{"id":"ttl.Package","version":"1.2.3","resources":[]}"#)
            .expect(2)
            .create();

        // Zero TTLs from the settings file must expire both caches
        // immediately, so every call probes and refetches.
        let config = toml::Value::from_str(&format!(
            r#"
                availability_ttl_secs = 0
                metadata_ttl_secs = 0

                [default]
                url = "{}/regttl"
                supports_availability = true
            "#,
            mockito::server_url(),
        ))
        .unwrap();
        let settings = RegistriesSettings::deserialize_config(config).unwrap();
        let client = RegistryClientBuilder::from_settings(&settings)
            .unwrap()
            .build()
            .unwrap();

        let package = PackageIdentity::new("ttl.Package");
        let version = Version::parse("1.2.3").unwrap();
        for _ in 0..2 {
            client
                .get_package_version_metadata(&package, &version, None)
                .await
                .unwrap();
        }

        probe.assert();
        endpoint.assert();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn version_metadata_is_cached() {
        let endpoint = mockito::mock("GET", "/cached/Package/1.2.3")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("content-version", "1")
            .with_body(r#"{"id":"cached.Package","version":"1.2.3","resources":[]}"#)
            .expect(1)
            .create();

        let client = client(false);
        let package = PackageIdentity::new("cached.Package");
        let version = Version::parse("1.2.3").unwrap();

        let first = client
            .get_package_version_metadata(&package, &version, None)
            .await
            .unwrap();
        let second = client
            .get_package_version_metadata(&package, &version, None)
            .await
            .unwrap();

        assert_eq!(first, second);
        endpoint.assert();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn available_manifests_include_link_alternates() {
        let link = concat!(
            r#"<https://r/manif/Package/1.0.0/Package.swift?swift-version=4.2>; "#,
            r#"rel="alternate"; filename="Package@swift-4.2.swift"; swift-tools-version="4.2""#,
        );
        let _m = mockito::mock("GET", "/manif/Package/1.0.0/Package.swift")
            .with_status(200)
            .with_header("content-type", "text/x-swift")
            .with_header("content-version", "1")
            .with_header("link", link)
            .with_body("// swift-tools-version:5.5\nimport PackageDescription\n")
            .create();

        let client = client(false);
        let package = PackageIdentity::new("manif.Package");
        let version = Version::parse("1.0.0").unwrap();
        let manifests = client
            .get_available_manifests(&package, &version, None)
            .await
            .unwrap();

        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].filename, "Package.swift");
        assert_eq!(manifests[0].tools_version, Some("5.5".parse().unwrap()));
        assert!(manifests[0].content.is_some());
        assert_eq!(manifests[1].filename, "Package@swift-4.2.swift");
        assert_eq!(manifests[1].content, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manifest_content_passes_tools_version_query() {
        let _m = mockito::mock(
            "GET",
            "/query/Package/1.0.0/Package.swift?swift-version=4.2",
        )
        .with_status(200)
        .with_header("content-type", "text/x-swift")
        .with_header("content-version", "1")
        .with_body("// swift-tools-version:4.2\n")
        .create();

        let client = client(false);
        let package = PackageIdentity::new("query.Package");
        let version = Version::parse("1.0.0").unwrap();
        let content = client
            .get_manifest_content(&package, &version, Some("4.2".parse().unwrap()), None)
            .await
            .unwrap();

        assert!(content.starts_with("// swift-tools-version:4.2"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lookup_identities_distinguishes_empty_from_error() {
        let scm_url = Url::parse("https://example.com/mona/LinkedList").unwrap();

        let found = mockito::mock(
            "GET",
            "/identifiers?url=https%3A%2F%2Fexample.com%2Fmona%2FLinkedList",
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("content-version", "1")
        .with_body(r#"{"identifiers":["mona.LinkedList"]}"#)
        .create();

        let client = client(false);
        let identities = client.lookup_identities(&scm_url, None).await.unwrap();
        let expected: HashSet<PackageIdentity> =
            vec![PackageIdentity::new("mona.LinkedList")].into_iter().collect();
        assert_eq!(identities, expected);
        found.assert();

        drop(found);
        let _absent = mockito::mock(
            "GET",
            "/identifiers?url=https%3A%2F%2Fexample.com%2Fmona%2FLinkedList",
        )
        .with_status(404)
        .create();

        let identities = client.lookup_identities(&scm_url, None).await.unwrap();
        assert!(identities.is_empty());

        drop(_absent);
        let _broken = mockito::mock(
            "GET",
            "/identifiers?url=https%3A%2F%2Fexample.com%2Fmona%2FLinkedList",
        )
        .with_status(500)
        .create();

        let result = client.lookup_identities(&scm_url, None).await;
        assert!(matches!(
            result,
            Err(RegistryError::FailedIdentityLookup { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unexpected_status_prefers_problem_body() {
        let _m = mockito::mock("GET", "/problem/Package")
            .with_status(418)
            .with_header("content-type", "application/problem+json")
            .with_body(r#"{"detail":"short and stout"}"#)
            .create();

        let client = client(false);
        let package = PackageIdentity::new("problem.Package");
        let result = client.get_package_metadata(&package, None).await;

        match result {
            Err(RegistryError::FailedRetrievingReleases { cause, .. }) => match *cause {
                RegistryError::ServerError { code, ref details } => {
                    assert_eq!(code, 418);
                    assert_eq!(details, "short and stout");
                }
                ref other => panic!("unexpected cause: {:?}", other),
            },
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unexpected_status_falls_back_to_well_known_codes() {
        let _m = mockito::mock("GET", "/denied/Package")
            .with_status(401)
            .create();

        let client = client(false);
        let package = PackageIdentity::new("denied.Package");
        let result = client.get_package_metadata(&package, None).await;

        match result {
            Err(RegistryError::FailedRetrievingReleases { cause, .. }) => {
                assert!(matches!(*cause, RegistryError::Unauthorized));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publish_roundtrip_statuses() {
        let version = Version::parse("1.0.0").unwrap();

        let _created = mockito::mock("PUT", "/pub/Created/1.0.0")
            .with_status(201)
            .with_header("location", "https://registry.example.com/pub/Created/1.0.0")
            .create();

        let client = client(false);
        let result = client
            .publish(
                &PackageIdentity::new("pub.Created"),
                &version,
                b"zipbytes".to_vec(),
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            PublishResult::Published {
                location: Some(
                    Url::parse("https://registry.example.com/pub/Created/1.0.0").unwrap()
                ),
            }
        );

        let _accepted = mockito::mock("PUT", "/pub/Accepted/1.0.0")
            .with_status(202)
            .with_header("location", "https://registry.example.com/status/42")
            .with_header("retry-after", "120")
            .create();

        let result = client
            .publish(
                &PackageIdentity::new("pub.Accepted"),
                &version,
                b"zipbytes".to_vec(),
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            PublishResult::Processing {
                status_url: Url::parse("https://registry.example.com/status/42").unwrap(),
                retry_after: Some(120),
            }
        );

        let _missing = mockito::mock("PUT", "/pub/Missing/1.0.0")
            .with_status(202)
            .create();

        let result = client
            .publish(
                &PackageIdentity::new("pub.Missing"),
                &version,
                b"zipbytes".to_vec(),
                None,
                None,
                None,
                None,
            )
            .await;
        assert!(matches!(
            result,
            Err(RegistryError::MissingPublishingLocation)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publish_with_signature_requires_format_before_io() {
        let client = client(false);
        let result = client
            .publish(
                &PackageIdentity::new("pub.Unsignedfmt"),
                &Version::parse("1.0.0").unwrap(),
                b"zipbytes".to_vec(),
                Some(b"signature".to_vec()),
                None,
                None,
                None,
            )
            .await;

        assert!(matches!(result, Err(RegistryError::MissingSignatureFormat)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bearer_token_is_attached_for_matching_registry() {
        let endpoint = mockito::mock("GET", "/auth/Package")
            .match_header("authorization", "Bearer s3kr3t")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("content-version", "1")
            .with_body("{\"releases\":{}}")
            .create();

        let registry_url = Url::parse(&mockito::server_url()).unwrap();
        let mut tokens = HashMap::new();
        tokens.insert(registry_url.clone(), "s3kr3t".to_string());

        let client = RegistryClient::builder(RegistryConfiguration {
            default_registry: Some(Registry::new(registry_url)),
            scoped_registries: HashMap::new(),
        })
        .auth_tokens(tokens)
        .build()
        .unwrap();

        client
            .get_package_metadata(&PackageIdentity::new("auth.Package"), None)
            .await
            .unwrap();
        endpoint.assert();
    }
}
