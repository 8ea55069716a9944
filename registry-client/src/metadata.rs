//! Release metadata: wire payloads and their client-facing projections.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use semver::Version;
use url::Url;

use crate::links::AlternativeLocation;
use crate::registry::Registry;
use crate::signing::SigningEntity;

/// Canonical name of the downloadable source archive resource.
pub static SOURCE_ARCHIVE_RESOURCE: &str = "source-archive";

/// Name of the provenance sidecar written into extracted packages.
pub static REGISTRY_METADATA_FILENAME: &str = ".registry-metadata";

lazy_static! {
    static ref TOOLS_VERSION_RE: Regex =
        Regex::new(r"^//\s*swift-tools-version:\s*([0-9.]+)").expect("hardcoded regex");
}

/// A tools version marker, e.g. `5.5` or `5.5.2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolsVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Optional patch component.
    pub patch: Option<u32>,
}

/// Error parsing a [`ToolsVersion`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidToolsVersion(pub String);

impl fmt::Display for InvalidToolsVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid tools version '{}'", self.0)
    }
}

impl std::error::Error for InvalidToolsVersion {}

impl FromStr for ToolsVersion {
    type Err = InvalidToolsVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidToolsVersion(s.to_string());
        let mut parts = s.split('.');

        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let patch = match parts.next() {
            Some(p) => Some(p.parse().map_err(|_| invalid())?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for ToolsVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

/// Extract the tools-version comment from the first line of a manifest.
pub fn tools_version_from_manifest(content: &str) -> Option<ToolsVersion> {
    let first_line = content.lines().next()?;
    let captures = TOOLS_VERSION_RE.captures(first_line)?;
    captures[1].parse().ok()
}

/// Wire-format payloads of the v1 registry API.
pub mod wire {
    use std::collections::HashMap;

    use super::SOURCE_ARCHIVE_RESOURCE;

    /// Body of `GET /{scope}/{name}`.
    #[derive(Debug, Deserialize)]
    pub struct Releases {
        /// Known releases, keyed by version string.
        pub releases: HashMap<String, Release>,
    }

    /// A single release entry.
    #[derive(Debug, Default, Deserialize)]
    pub struct Release {
        /// Location of the release resource.
        pub url: Option<String>,
        /// Set when the release is unavailable, e.g. yanked.
        pub problem: Option<Problem>,
    }

    /// RFC 7807 problem details.
    #[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
    pub struct Problem {
        /// Problem type URI.
        #[serde(rename = "type")]
        pub kind: Option<String>,
        /// Short human-readable summary.
        pub title: Option<String>,
        /// HTTP status code.
        pub status: Option<u16>,
        /// Human-readable explanation.
        pub detail: Option<String>,
    }

    /// Body of `GET /{scope}/{name}/{version}`.
    #[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
    pub struct VersionMetadata {
        /// Package identity, in `scope.name` form.
        pub id: String,
        /// Release version string.
        pub version: String,
        /// Downloadable resources of this release.
        #[serde(default)]
        pub resources: Vec<Resource>,
        /// Additional free-form metadata.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub metadata: Option<AdditionalMetadata>,
        /// Publication timestamp, as reported by the registry.
        #[serde(rename = "publishedAt", skip_serializing_if = "Option::is_none")]
        pub published_at: Option<String>,
    }

    impl VersionMetadata {
        /// The canonical source-archive resource, if present.
        pub fn source_archive(&self) -> Option<&Resource> {
            self.resources
                .iter()
                .find(|resource| resource.name == SOURCE_ARCHIVE_RESOURCE)
        }
    }

    /// A downloadable resource of a release.
    #[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
    pub struct Resource {
        /// Resource name; `source-archive` for the canonical archive.
        pub name: String,
        /// Resource content type, e.g. `application/zip`.
        #[serde(rename = "type")]
        pub kind: String,
        /// Resource checksum, hex encoded.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub checksum: Option<String>,
        /// Detached-signature descriptor.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub signing: Option<Signing>,
    }

    /// Detached signature attached to a resource.
    #[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
    pub struct Signing {
        /// The signature bytes, base64 encoded.
        #[serde(rename = "signatureBase64")]
        pub signature_base64: Option<String>,
        /// Signature format label, e.g. `cms-1.0.0`.
        #[serde(rename = "signatureFormat")]
        pub signature_format: Option<String>,
    }

    /// Additional metadata block of a release.
    #[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
    pub struct AdditionalMetadata {
        /// Release author.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub author: Option<Author>,
        /// Package description.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub description: Option<String>,
        /// License location.
        #[serde(rename = "licenseURL", skip_serializing_if = "Option::is_none")]
        pub license_url: Option<String>,
        /// Readme location.
        #[serde(rename = "readmeURL", skip_serializing_if = "Option::is_none")]
        pub readme_url: Option<String>,
        /// Source-control mirrors of the package.
        #[serde(rename = "repositoryURLs", skip_serializing_if = "Option::is_none")]
        pub repository_urls: Option<Vec<String>>,
    }

    /// Author block in release metadata.
    #[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
    pub struct Author {
        /// Author name.
        pub name: Option<String>,
        /// Contact address.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub email: Option<String>,
        /// Home page.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub url: Option<String>,
    }

    /// Body of `GET /identifiers?url=...`.
    #[derive(Debug, Deserialize)]
    pub struct Identifiers {
        /// Package identities known for the queried URL.
        pub identifiers: Vec<String>,
    }
}

/// Decoded release list for a package.
#[derive(Clone, Debug, PartialEq)]
pub struct PackageMetadata {
    /// Registry the list came from.
    pub registry: Registry,
    /// Known versions, newest first.
    pub versions: Vec<Version>,
    /// Alternative locations advertised via `Link`.
    pub alternate_locations: Vec<AlternativeLocation>,
}

/// Decoded metadata for a single package version.
#[derive(Clone, Debug, PartialEq)]
pub struct PackageVersionMetadata {
    /// Registry the metadata came from.
    pub registry: Registry,
    /// License location.
    pub license_url: Option<Url>,
    /// Readme location.
    pub readme_url: Option<Url>,
    /// Source-control mirrors of the package.
    pub repository_urls: Option<Vec<Url>>,
    /// Downloadable resources of this release.
    pub resources: Vec<wire::Resource>,
    /// Release author.
    pub author: Option<wire::Author>,
    /// Package description.
    pub description: Option<String>,
}

impl PackageVersionMetadata {
    pub(crate) fn from_wire(registry: Registry, metadata: &wire::VersionMetadata) -> Self {
        let extra = metadata.metadata.clone().unwrap_or_default();
        Self {
            registry,
            license_url: extra
                .license_url
                .as_deref()
                .and_then(|url| Url::parse(url).ok()),
            readme_url: extra
                .readme_url
                .as_deref()
                .and_then(|url| Url::parse(url).ok()),
            repository_urls: extra.repository_urls.map(|urls| {
                urls.iter()
                    .filter_map(|url| Url::parse(url).ok())
                    .collect()
            }),
            resources: metadata.resources.clone(),
            author: extra.author,
            description: extra.description,
        }
    }

    /// The canonical source-archive resource, if present.
    pub fn source_archive(&self) -> Option<&wire::Resource> {
        self.resources
            .iter()
            .find(|resource| resource.name == SOURCE_ARCHIVE_RESOURCE)
    }
}

/// A manifest variant advertised for a release.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestDescriptor {
    /// Manifest filename.
    pub filename: String,
    /// Tools version the manifest targets, when known.
    pub tools_version: Option<ToolsVersion>,
    /// Manifest source; populated for the default manifest only.
    pub content: Option<String>,
}

/// Provenance sidecar persisted into an extracted package.
///
/// Serialized as `.registry-metadata` in the package root; required to
/// round-trip.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RegistrySourceMetadata {
    /// Where the package contents came from.
    pub source: SidecarSource,
    /// Release metadata as served at download time.
    pub metadata: wire::VersionMetadata,
    /// Outcome of signature validation at download time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SidecarSignature>,
}

/// Provenance source record.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SidecarSource {
    /// Source kind; always `registry` for this client.
    #[serde(rename = "type")]
    pub kind: String,
    /// Registry base URL.
    pub url: Url,
}

/// Signature outcome record.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SidecarSignature {
    /// Verified signer; absent when validation was waived by policy.
    #[serde(rename = "signedBy")]
    pub signed_by: Option<SigningEntity>,
    /// Signature format label.
    pub format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tools_version_parsing() {
        assert_eq!(
            "5.5".parse::<ToolsVersion>().unwrap(),
            ToolsVersion {
                major: 5,
                minor: 5,
                patch: None
            }
        );
        assert_eq!("5.5.2".parse::<ToolsVersion>().unwrap().to_string(), "5.5.2");
        assert!("5".parse::<ToolsVersion>().is_err());
        assert!("5.5.2.1".parse::<ToolsVersion>().is_err());
        assert!("banana".parse::<ToolsVersion>().is_err());
    }

    #[test]
    fn tools_version_from_manifest_first_line() {
        let manifest = "// swift-tools-version:5.5\nimport PackageDescription\n";
        assert_eq!(
            tools_version_from_manifest(manifest),
            Some("5.5".parse().unwrap())
        );

        let spaced = "//  swift-tools-version: 5.7.1\n";
        assert_eq!(
            tools_version_from_manifest(spaced),
            Some("5.7.1".parse().unwrap())
        );

        assert_eq!(tools_version_from_manifest("import Foo\n"), None);
    }

    #[test]
    fn deserialize_version_metadata() {
        let json = r#"
            {
                "id": "mona.LinkedList",
                "version": "1.1.1",
                "resources": [
                    {
                        "name": "source-archive",
                        "type": "application/zip",
                        "checksum": "a2ac54cf25fbc1ad0028f03f0aa4b96833b83bb05a14e510892bb27dea4dc812",
                        "signing": {
                            "signatureBase64": "l0cwHw==",
                            "signatureFormat": "cms-1.0.0"
                        }
                    }
                ],
                "metadata": {
                    "description": "One thing links to another.",
                    "licenseURL": "https://github.com/mona/LinkedList/license",
                    "repositoryURLs": ["https://github.com/mona/LinkedList"]
                }
            }
            "#;

        let metadata = serde_json::from_str::<wire::VersionMetadata>(json).unwrap();
        let archive = metadata.source_archive().expect("source archive resource");

        assert_eq!(
            archive.checksum.as_deref(),
            Some("a2ac54cf25fbc1ad0028f03f0aa4b96833b83bb05a14e510892bb27dea4dc812")
        );
        assert_eq!(
            archive
                .signing
                .as_ref()
                .and_then(|s| s.signature_format.as_deref()),
            Some("cms-1.0.0")
        );
    }

    #[test]
    fn sidecar_round_trips() {
        let sidecar = RegistrySourceMetadata {
            source: SidecarSource {
                kind: "registry".to_string(),
                url: Url::parse("https://registry.example.com").unwrap(),
            },
            metadata: wire::VersionMetadata {
                id: "mona.LinkedList".to_string(),
                version: "1.1.1".to_string(),
                resources: vec![],
                metadata: None,
                published_at: None,
            },
            signature: Some(SidecarSignature {
                signed_by: None,
                format: Some("cms-1.0.0".to_string()),
            }),
        };

        let encoded = serde_json::to_vec_pretty(&sidecar).unwrap();
        let decoded: RegistrySourceMetadata = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, sidecar);

        // Re-encoding is byte stable.
        assert_eq!(serde_json::to_vec_pretty(&decoded).unwrap(), encoded);
    }
}
