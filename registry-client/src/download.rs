//! Source-archive acquisition pipeline.
//!
//! Download, signature validation, checksum trust-on-first-use,
//! extraction, and provenance persistence, in that strict order. A
//! failure at any stage leaves the destination absent.

use std::io;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use semver::Version;

use crate::client::{join_url, RegistryClient};
use crate::content::{validate_api_version, validate_content_type, MediaType};
use crate::error::RegistryError;
use crate::identity::{PackageIdentity, RegistryIdentity};
use crate::metadata::{
    RegistrySourceMetadata, SidecarSignature, SidecarSource, REGISTRY_METADATA_FILENAME,
};
use crate::registry::Registry;
use crate::signing::{validate_source_archive_signature, SignatureContext};
use crate::tofu;
use crate::transport::{Method, ProgressHandler};

/// Checksum algorithms usable for source archives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// SHA-256, the registry default.
    Sha256,
}

impl ChecksumAlgorithm {
    /// Hex digest (lower-case) of `bytes`.
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Sha256 => {
                use sha2::{Digest, Sha256};
                hex::encode(Sha256::digest(bytes))
            }
        }
    }
}

impl RegistryClient {
    /// Download, verify, and extract the source archive of a release
    /// into `destination`, which must not exist yet.
    ///
    /// On success the destination holds the extracted package plus a
    /// `.registry-metadata` provenance sidecar.
    pub async fn download_source_archive(
        &self,
        package: &PackageIdentity,
        version: &Version,
        destination: &Path,
        checksum_algorithm: ChecksumAlgorithm,
        progress: Option<ProgressHandler>,
        timeout: Option<Duration>,
    ) -> Result<(), RegistryError> {
        let (identity, registry) = self.resolve(package)?;
        let archive_path = destination.with_extension("zip");

        let result = self
            .run_download(
                &registry,
                &identity,
                version,
                destination,
                &archive_path,
                checksum_algorithm,
                progress,
                timeout,
            )
            .await;

        // The temporary archive never outlives the operation.
        if let Err(e) = self.filesystem.remove_file_tree(&archive_path).await {
            warn!("failed removing {}: {}", archive_path.display(), e);
        }
        // A pre-existing destination was not created by this pipeline
        // and stays untouched; anything else is ours to clean up.
        let destination_was_foreign = matches!(result, Err(RegistryError::PathAlreadyExists(_)));
        if result.is_err() && !destination_was_foreign && self.filesystem.exists(destination).await
        {
            if let Err(e) = self.filesystem.remove_file_tree(destination).await {
                warn!("failed removing {}: {}", destination.display(), e);
            }
        }

        result.map_err(|cause| match cause {
            e @ RegistryError::PathAlreadyExists(_) => e,
            cause => RegistryError::FailedDownloadingSourceArchive {
                registry: registry.url.clone(),
                package: identity.to_string(),
                version: version.to_string(),
                cause: Box::new(cause),
            },
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_download(
        &self,
        registry: &Registry,
        identity: &RegistryIdentity,
        version: &Version,
        destination: &Path,
        archive_path: &Path,
        checksum_algorithm: ChecksumAlgorithm,
        progress: Option<ProgressHandler>,
        timeout: Option<Duration>,
    ) -> Result<(), RegistryError> {
        let metadata = self
            .raw_version_metadata(registry, identity, version, timeout)
            .await?;

        if let Some(parent) = destination.parent() {
            if !self.filesystem.exists(parent).await {
                self.filesystem.create_directory(parent, true).await?;
            }
        }
        // A stale archive from an interrupted run must not survive.
        self.filesystem.remove_file_tree(archive_path).await?;
        if self.filesystem.exists(destination).await {
            return Err(RegistryError::PathAlreadyExists(destination.to_owned()));
        }

        let url = join_url(
            &registry.url,
            &[
                identity.scope().as_str(),
                identity.name().as_str(),
                &format!("{}.zip", version),
            ],
        )?;
        debug!("downloading {} {} from {}", identity, version, url);
        let request = self.new_request(Method::Get, url, Some(MediaType::Zip), timeout);
        let response = self
            .transport
            .download(request, archive_path, progress.as_ref())
            .await?;
        if response.status == 404 {
            return Err(RegistryError::PackageVersionNotFound);
        }
        if response.status != 200 {
            return Err(Self::unexpected_status(&[200], &response));
        }

        // Archive responses may omit Content-Version.
        validate_api_version(&response.headers, true)?;
        validate_content_type(&response.headers, MediaType::Zip.content_type())?;

        let archive = self.filesystem.read_file_contents(archive_path).await?;
        let checksum = checksum_algorithm.digest(&archive);

        let context = SignatureContext {
            registry: &registry.url,
            package: identity,
            version,
        };
        let signing_entity = validate_source_archive_signature(
            &context,
            &metadata,
            &archive,
            &self.signing_policy,
            self.verifier.as_deref(),
            &self.verifier_configuration,
            self.delegate.as_deref(),
        )
        .await?;

        let declared = metadata
            .source_archive()
            .and_then(|resource| resource.checksum.clone())
            .ok_or(RegistryError::SourceArchiveMissingChecksum)?;
        if declared != checksum {
            return Err(RegistryError::InvalidChecksum {
                expected: declared,
                actual: checksum,
            });
        }
        tofu::validate_checksum(
            self.fingerprints.as_ref(),
            &self.tofu_policy,
            identity,
            version,
            &checksum,
        )
        .await?;
        tofu::validate_signing_entity(
            self.signing_entities.as_ref(),
            &self.tofu_policy,
            identity,
            version,
            signing_entity.as_ref(),
        )
        .await?;

        // The pipeline is asynchronous; somebody may have raced us here.
        if self.filesystem.exists(destination).await {
            return Err(RegistryError::PathAlreadyExists(destination.to_owned()));
        }
        self.filesystem.create_directory(destination, true).await?;

        let extractor = self
            .extractor
            .as_ref()
            .ok_or_else(|| RegistryError::MissingConfiguration("archive extractor".to_string()))?;
        extractor.extract(archive_path, destination).await?;
        self.filesystem.strip_first_level(destination).await?;

        let signature = metadata
            .source_archive()
            .and_then(|resource| resource.signing.clone())
            .map(|signing| SidecarSignature {
                signed_by: signing_entity.clone(),
                format: signing.signature_format,
            });
        let sidecar = RegistrySourceMetadata {
            source: SidecarSource {
                kind: "registry".to_string(),
                url: registry.url.clone(),
            },
            metadata,
            signature,
        };
        let encoded = serde_json::to_vec_pretty(&sidecar)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.filesystem
            .write_file_contents(&destination.join(REGISTRY_METADATA_FILENAME), &encoded)
            .await?;

        Ok(())
    }
}
