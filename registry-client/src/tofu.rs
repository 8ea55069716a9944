//! Trust-on-first-use validation.
//!
//! Records checksums and signing entities at first sight and enforces
//! equality on later sightings. Trust failures are authoritative; the
//! client never retries past them.

use log::warn;
use semver::Version;
use smart_default::SmartDefault;

use crate::error::RegistryError;
use crate::identity::RegistryIdentity;
use crate::signing::SigningEntity;
use crate::stores::{Fingerprint, FingerprintKind, FingerprintStore, SigningEntityStore};

/// How strictly trust violations are handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, SmartDefault)]
#[serde(rename_all = "lowercase")]
pub enum CheckingMode {
    /// Violations fail the operation.
    #[default]
    Strict,
    /// Violations log a warning and continue.
    Warn,
}

/// Trust-on-first-use policy.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct TofuPolicy {
    /// Whether checksum TOFU runs at all.
    #[default(true)]
    pub checksum_enabled: bool,

    /// Reaction to checksum mismatches.
    #[default(CheckingMode::Strict)]
    pub checksum_mode: CheckingMode,

    /// Reaction to signing-entity mismatches.
    #[default(CheckingMode::Strict)]
    pub signing_entity_mode: CheckingMode,
}

/// Validate `checksum` for a release against the fingerprint store.
///
/// The first observation is recorded; later observations must match it.
pub(crate) async fn validate_checksum(
    store: &dyn FingerprintStore,
    policy: &TofuPolicy,
    package: &RegistryIdentity,
    version: &Version,
    checksum: &str,
) -> Result<(), RegistryError> {
    if !policy.checksum_enabled {
        return Ok(());
    }

    match store
        .get(package, version, FingerprintKind::SourceArchive)
        .await?
    {
        None => {
            store
                .put(
                    package,
                    version,
                    Fingerprint {
                        kind: FingerprintKind::SourceArchive,
                        value: checksum.to_string(),
                    },
                )
                .await
        }
        Some(previous) if previous.value == checksum => Ok(()),
        Some(previous) => match policy.checksum_mode {
            CheckingMode::Strict => Err(RegistryError::ChecksumChanged {
                latest: checksum.to_string(),
                previous: previous.value,
            }),
            CheckingMode::Warn => {
                warn!(
                    "checksum of {} {} changed from {} to {}",
                    package, version, previous.value, checksum
                );
                Ok(())
            }
        },
    }
}

/// Validate the signing entity observed for a release.
///
/// `None` counts as no observation: it is neither recorded nor compared,
/// and never overwrites a previously recorded entity.
pub(crate) async fn validate_signing_entity(
    store: &dyn SigningEntityStore,
    policy: &TofuPolicy,
    package: &RegistryIdentity,
    version: &Version,
    entity: Option<&SigningEntity>,
) -> Result<(), RegistryError> {
    let entity = match entity {
        Some(entity) => entity,
        None => return Ok(()),
    };

    if let Some(previous) = store.release_signer(package, version).await? {
        if &previous != entity {
            match policy.signing_entity_mode {
                CheckingMode::Strict => {
                    return Err(RegistryError::SigningEntityForReleaseChanged {
                        package: package.to_string(),
                        version: version.to_string(),
                        latest: entity.clone(),
                        previous,
                    });
                }
                CheckingMode::Warn => warn!(
                    "signing entity for {} {} changed from '{}' to '{}'",
                    package, version, previous, entity
                ),
            }
        }
    }

    if let Some(previous) = store.package_signer(package).await? {
        if &previous != entity {
            match policy.signing_entity_mode {
                CheckingMode::Strict => {
                    return Err(RegistryError::SigningEntityForPackageChanged {
                        package: package.to_string(),
                        latest: entity.clone(),
                        previous,
                    });
                }
                CheckingMode::Warn => warn!(
                    "signing entity for {} changed from '{}' to '{}'",
                    package, previous, entity
                ),
            }
        }
    }

    store.record(package, version, entity.clone()).await
}
