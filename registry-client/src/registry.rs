//! Registry endpoints and their configuration.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use smart_default::SmartDefault;
use url::Url;

use crate::error::RegistryError;
use crate::identity::Scope;

/// Availability cache TTL, seconds.
pub static DEFAULT_AVAILABILITY_TTL_SECS: u64 = 300;
/// Version-metadata cache TTL, seconds.
pub static DEFAULT_METADATA_TTL_SECS: u64 = 3600;

/// A package registry endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Registry {
    /// Base HTTPS URL of the registry API.
    pub url: Url,
    /// Whether the registry implements the availability probe.
    pub supports_availability: bool,
}

impl Registry {
    /// A registry at `url` without availability support.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            supports_availability: false,
        }
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Mapping from package scopes to responsible registries.
#[derive(Clone, Debug, Default)]
pub struct RegistryConfiguration {
    /// Registry used for scopes without an override.
    pub default_registry: Option<Registry>,
    /// Per-scope registry overrides.
    pub scoped_registries: HashMap<Scope, Registry>,
}

impl RegistryConfiguration {
    /// The registry responsible for `scope`, scoped overrides first.
    pub fn registry(&self, scope: &Scope) -> Option<&Registry> {
        self.scoped_registries
            .get(scope)
            .or(self.default_registry.as_ref())
    }
}

/// One registry entry in the settings file.
#[derive(Clone, Debug, Deserialize, SmartDefault, PartialEq)]
#[serde(default)]
pub struct RegistrySettings {
    /// Base URL of the registry API.
    pub url: String,

    /// Whether the registry implements `GET /availability`.
    #[default(false)]
    pub supports_availability: bool,

    /// File with a bearer token for this registry, first line only.
    #[default(Option::None)]
    pub credentials_path: Option<PathBuf>,
}

/// Client settings, usually deserialized from TOML.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct RegistriesSettings {
    /// Registry used for scopes without an override.
    #[default(Option::None)]
    pub default: Option<RegistrySettings>,

    /// Per-scope registry overrides, keyed by scope.
    pub scoped: HashMap<String, RegistrySettings>,

    /// How long availability probe results are served from cache.
    #[default(DEFAULT_AVAILABILITY_TTL_SECS)]
    pub availability_ttl_secs: u64,

    /// How long version metadata is served from cache.
    #[default(DEFAULT_METADATA_TTL_SECS)]
    pub metadata_ttl_secs: u64,
}

impl RegistriesSettings {
    /// Validate raw settings and fill in defaults.
    pub fn deserialize_config(cfg: toml::Value) -> Result<Self> {
        let settings: Self = cfg
            .clone()
            .try_into()
            .context(format!("deserializing {:?}", &cfg))?;

        if let Some(default) = &settings.default {
            Url::parse(&default.url).context("parsing default registry URL")?;
        }
        for (scope, registry) in &settings.scoped {
            scope
                .parse::<Scope>()
                .context(format!("validating scope '{}'", scope))?;
            Url::parse(&registry.url).context(format!("parsing registry URL for '{}'", scope))?;
        }

        Ok(settings)
    }

    /// Resolve these settings into a runtime configuration plus the
    /// bearer tokens read from credentials files.
    pub fn to_configuration(&self) -> Result<(RegistryConfiguration, HashMap<Url, String>)> {
        let mut tokens = HashMap::new();

        let mut resolve = |settings: &RegistrySettings| -> Result<Registry> {
            let url = Url::parse(&settings.url).map_err(|_| {
                anyhow::Error::new(RegistryError::InvalidUrl(settings.url.clone()))
            })?;
            if let Some(credentials_path) = &settings.credentials_path {
                let token = commons::read_credentials(credentials_path)
                    .context("could not read registry credentials")?;
                tokens.insert(url.clone(), token);
            }
            Ok(Registry {
                url,
                supports_availability: settings.supports_availability,
            })
        };

        let default_registry = self.default.as_ref().map(&mut resolve).transpose()?;
        let mut scoped_registries = HashMap::new();
        for (scope, settings) in &self.scoped {
            let scope: Scope = scope.parse()?;
            scoped_registries.insert(scope, resolve(settings)?);
        }

        Ok((
            RegistryConfiguration {
                default_registry,
                scoped_registries,
            },
            tokens,
        ))
    }
}
