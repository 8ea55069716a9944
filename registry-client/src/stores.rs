//! Persistent trust stores consumed by the client.
//!
//! The process-local implementations back tests and ephemeral use; real
//! deployments plug in disk-backed stores through the same traits.

use std::collections::HashMap;

use async_trait::async_trait;
use semver::Version;
use tokio::sync::RwLock;

use crate::error::RegistryError;
use crate::identity::RegistryIdentity;
use crate::signing::SigningEntity;

/// What a fingerprint was computed over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FingerprintKind {
    /// The release source archive.
    SourceArchive,
    /// The release manifest.
    Manifest,
}

/// A recorded content fingerprint for one release.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Fingerprint {
    /// What the fingerprint covers.
    pub kind: FingerprintKind,
    /// Hex-encoded digest.
    pub value: String,
}

/// Store of first-seen release fingerprints.
///
/// Implementations serialize concurrent writers internally.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// The fingerprint recorded for `package` at `version`, if any.
    async fn get(
        &self,
        package: &RegistryIdentity,
        version: &Version,
        kind: FingerprintKind,
    ) -> Result<Option<Fingerprint>, RegistryError>;

    /// Record `fingerprint`; the first write wins.
    async fn put(
        &self,
        package: &RegistryIdentity,
        version: &Version,
        fingerprint: Fingerprint,
    ) -> Result<(), RegistryError>;
}

/// Process-local fingerprint store.
#[derive(Debug, Default)]
pub struct InMemoryFingerprintStore {
    inner: RwLock<HashMap<(RegistryIdentity, Version, FingerprintKind), Fingerprint>>,
}

impl InMemoryFingerprintStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FingerprintStore for InMemoryFingerprintStore {
    async fn get(
        &self,
        package: &RegistryIdentity,
        version: &Version,
        kind: FingerprintKind,
    ) -> Result<Option<Fingerprint>, RegistryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(&(package.clone(), version.clone(), kind))
            .cloned())
    }

    async fn put(
        &self,
        package: &RegistryIdentity,
        version: &Version,
        fingerprint: Fingerprint,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        inner
            .entry((package.clone(), version.clone(), fingerprint.kind))
            .or_insert(fingerprint);
        Ok(())
    }
}

/// Store of first-seen signing entities.
///
/// Implementations serialize concurrent writers internally.
#[async_trait]
pub trait SigningEntityStore: Send + Sync {
    /// The entity first seen signing any release of `package`.
    async fn package_signer(
        &self,
        package: &RegistryIdentity,
    ) -> Result<Option<SigningEntity>, RegistryError>;

    /// The entity first seen signing `package` at `version`.
    async fn release_signer(
        &self,
        package: &RegistryIdentity,
        version: &Version,
    ) -> Result<Option<SigningEntity>, RegistryError>;

    /// Record `entity` for the package and the release; first writes win.
    async fn record(
        &self,
        package: &RegistryIdentity,
        version: &Version,
        entity: SigningEntity,
    ) -> Result<(), RegistryError>;
}

/// Process-local signing-entity store.
#[derive(Debug, Default)]
pub struct InMemorySigningEntityStore {
    packages: RwLock<HashMap<RegistryIdentity, SigningEntity>>,
    releases: RwLock<HashMap<(RegistryIdentity, Version), SigningEntity>>,
}

impl InMemorySigningEntityStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SigningEntityStore for InMemorySigningEntityStore {
    async fn package_signer(
        &self,
        package: &RegistryIdentity,
    ) -> Result<Option<SigningEntity>, RegistryError> {
        let packages = self.packages.read().await;
        Ok(packages.get(package).cloned())
    }

    async fn release_signer(
        &self,
        package: &RegistryIdentity,
        version: &Version,
    ) -> Result<Option<SigningEntity>, RegistryError> {
        let releases = self.releases.read().await;
        Ok(releases.get(&(package.clone(), version.clone())).cloned())
    }

    async fn record(
        &self,
        package: &RegistryIdentity,
        version: &Version,
        entity: SigningEntity,
    ) -> Result<(), RegistryError> {
        {
            let mut packages = self.packages.write().await;
            packages
                .entry(package.clone())
                .or_insert_with(|| entity.clone());
        }
        {
            let mut releases = self.releases.write().await;
            releases
                .entry((package.clone(), version.clone()))
                .or_insert(entity);
        }
        Ok(())
    }
}
