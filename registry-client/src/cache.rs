//! In-memory TTL caches.

use std::collections::HashMap;
use std::time::Duration;

use commons::expiry::Expiring;
use semver::Version;
use tokio::sync::RwLock;
use url::Url;

use crate::availability::AvailabilityStatus;
use crate::identity::RegistryIdentity;
use crate::metadata::wire;

/// Cache of availability probe results, keyed by registry URL.
///
/// Both positive and negative results are cached; a failed probe is an
/// actionable short-term fact. Expired entries are overwritten by the
/// next probe rather than evicted.
#[derive(Debug)]
pub(crate) struct AvailabilityCache {
    ttl: Duration,
    inner: RwLock<HashMap<Url, Expiring<AvailabilityStatus>>>,
}

impl AvailabilityCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn get(&self, registry: &Url) -> Option<AvailabilityStatus> {
        let inner = self.inner.read().await;
        inner
            .get(registry)
            .and_then(Expiring::value_if_valid)
            .cloned()
    }

    pub(crate) async fn put(&self, registry: Url, status: AvailabilityStatus) {
        let mut inner = self.inner.write().await;
        inner.insert(registry, Expiring::new(status, self.ttl));
    }
}

/// Key of one version-metadata cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct MetadataCacheKey {
    pub(crate) registry: Url,
    pub(crate) package: RegistryIdentity,
    pub(crate) version: Version,
}

/// Cache of decoded version metadata.
#[derive(Debug)]
pub(crate) struct MetadataCache {
    ttl: Duration,
    inner: RwLock<HashMap<MetadataCacheKey, Expiring<wire::VersionMetadata>>>,
}

impl MetadataCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn get(&self, key: &MetadataCacheKey) -> Option<wire::VersionMetadata> {
        let inner = self.inner.read().await;
        inner.get(key).and_then(Expiring::value_if_valid).cloned()
    }

    pub(crate) async fn put(&self, key: MetadataCacheKey, metadata: wire::VersionMetadata) {
        let mut inner = self.inner.write().await;
        inner.insert(key, Expiring::new(metadata, self.ttl));
    }
}
