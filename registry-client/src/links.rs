//! Parsing of RFC 8288 style `Link` headers.
//!
//! Registries use two flavors: alternative package locations on release
//! lists, and alternate manifests on manifest responses. Both parsers
//! accept the tolerant superset common registries emit.

use url::Url;

use crate::error::RegistryError;
use crate::metadata::ToolsVersion;

/// Relation of an alternative package location to the queried registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlternativeLocationKind {
    /// The authoritative location of the package.
    Canonical,
    /// A mirror of the package.
    Alternate,
}

/// An alternative package location from a `Link` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlternativeLocation {
    /// Location URL.
    pub url: Url,
    /// Relation to the queried registry.
    pub kind: AlternativeLocationKind,
}

/// An alternate-manifest entry from a `Link` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlternateManifest {
    /// Manifest URL.
    pub url: Url,
    /// Manifest filename, e.g. `Package@swift-5.5.swift`.
    pub filename: String,
    /// Tools version the manifest targets.
    pub tools_version: ToolsVersion,
}

/// Parse alternative package locations.
///
/// Malformed entries and unknown relations are skipped.
pub fn parse_alternative_locations(header: &str) -> Vec<AlternativeLocation> {
    let mut locations = Vec::new();
    for entry in header.split(',') {
        let mut fields = entry.split(';').map(str::trim);

        let url = match fields.next().and_then(parse_target) {
            Some(url) => url,
            None => continue,
        };
        let rel = fields
            .next()
            .and_then(parse_attribute)
            .filter(|(name, _)| *name == "rel")
            .map(|(_, value)| value);
        let kind = match rel {
            Some("canonical") => AlternativeLocationKind::Canonical,
            Some("alternate") => AlternativeLocationKind::Alternate,
            _ => continue,
        };

        locations.push(AlternativeLocation { url, kind });
    }
    locations
}

/// Parse alternate-manifest entries.
///
/// Fields may come in any order. Entries with other relations or missing
/// fields are dropped; a malformed tools-version is fatal.
pub fn parse_alternate_manifests(header: &str) -> Result<Vec<AlternateManifest>, RegistryError> {
    let mut manifests = Vec::new();
    for entry in header.split(',') {
        let mut url = None;
        let mut rel = None;
        let mut filename = None;
        let mut tools_version = None;

        for field in entry.split(';').map(str::trim) {
            if let Some(target) = parse_target(field) {
                url = Some(target);
                continue;
            }
            if let Some((name, value)) = parse_attribute(field) {
                match name {
                    "rel" => rel = Some(value.to_string()),
                    "filename" => filename = Some(value.to_string()),
                    "swift-tools-version" => {
                        let parsed = value.parse::<ToolsVersion>().map_err(|_| {
                            RegistryError::InvalidResponse(format!(
                                "invalid swift-tools-version '{}'",
                                value
                            ))
                        })?;
                        tools_version = Some(parsed);
                    }
                    _ => {}
                }
            }
        }

        if rel.as_deref() != Some("alternate") {
            continue;
        }
        if let (Some(url), Some(filename), Some(tools_version)) = (url, filename, tools_version) {
            manifests.push(AlternateManifest {
                url,
                filename,
                tools_version,
            });
        }
    }
    Ok(manifests)
}

fn parse_target(field: &str) -> Option<Url> {
    let inner = field.strip_prefix('<')?.strip_suffix('>')?;
    Url::parse(inner).ok()
}

fn parse_attribute(field: &str) -> Option<(&str, &str)> {
    let mut parts = field.splitn(2, '=');
    let name = parts.next()?.trim();
    let value = parts.next()?.trim().trim_matches('"');
    Some((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn alternative_locations_both_kinds() {
        let header = r#"<https://a>; rel="canonical", <ssh://b>; rel="alternate""#;
        let locations = parse_alternative_locations(header);

        assert_eq!(
            locations,
            vec![
                AlternativeLocation {
                    url: Url::parse("https://a").unwrap(),
                    kind: AlternativeLocationKind::Canonical,
                },
                AlternativeLocation {
                    url: Url::parse("ssh://b").unwrap(),
                    kind: AlternativeLocationKind::Alternate,
                },
            ]
        );
    }

    #[test]
    fn alternative_locations_skip_unknown_rel_and_garbage() {
        let header = r#"<https://a>; rel="self", garbage, <https://b>; rel="canonical""#;
        let locations = parse_alternative_locations(header);

        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].url.as_str(), "https://b/");
        assert_eq!(locations[0].kind, AlternativeLocationKind::Canonical);
    }

    #[test]
    fn alternate_manifests_fields_in_any_order() {
        let header = concat!(
            r#"<https://r/mona/LinkedList/1.0.0/Package.swift?swift-version=4>; "#,
            r#"filename="Package@swift-4.swift"; swift-tools-version="4.0"; rel="alternate""#,
        );
        let manifests = parse_alternate_manifests(header).unwrap();

        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].filename, "Package@swift-4.swift");
        assert_eq!(manifests[0].tools_version, "4.0".parse().unwrap());
    }

    #[test]
    fn alternate_manifests_drop_other_rels_and_incomplete_entries() {
        let header = concat!(
            r#"<https://r/a>; rel="canonical"; filename="x"; swift-tools-version="5.0", "#,
            r#"<https://r/b>; rel="alternate"; swift-tools-version="5.1""#,
        );
        let manifests = parse_alternate_manifests(header).unwrap();
        assert!(manifests.is_empty());
    }

    #[test]
    fn alternate_manifests_reject_bad_tools_version() {
        let header = r#"<https://r/a>; rel="alternate"; filename="x"; swift-tools-version="banana""#;
        assert!(matches!(
            parse_alternate_manifests(header),
            Err(RegistryError::InvalidResponse(_))
        ));
    }
}
