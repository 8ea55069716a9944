//! Asynchronous metadata provider for the GitHub v3 API.

mod models;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result as Fallible};
use log::{trace, warn};
use semver::Version;
use smart_default::SmartDefault;
use url::Url;

use crate::breaker::CircuitBreaker;
use crate::cache::{now_epoch, DiskCache};
use crate::error::GithubMetadataError;

/// Request timeout, seconds.
pub static DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 1;
/// Retry budget per request.
pub static DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Base delay between retries, milliseconds; doubles per attempt.
pub static DEFAULT_RETRY_BASE_DELAY_MS: u64 = 50;
/// Errors within the window before a host is tripped.
pub static DEFAULT_BREAKER_MAX_ERRORS: usize = 50;
/// Sliding error window, seconds.
pub static DEFAULT_BREAKER_WINDOW_SECS: u64 = 30;
/// Disk cache TTL, seconds.
pub static DEFAULT_CACHE_TTL_SECS: u64 = 3600;
/// Disk cache size ceiling, bytes.
pub static DEFAULT_CACHE_SIZE_LIMIT_BYTES: u64 = 16 * 1024 * 1024;
/// Remaining-requests level that triggers a warning.
pub static DEFAULT_RATE_LIMIT_WARNING_THRESHOLD: u64 = 5;

static USER_AGENT: &str = "package-metadata-provider";
static PRIMARY_ACCEPT: &str = "application/vnd.github.mercy-preview+json";
static FANOUT_ACCEPT: &str = "application/vnd.github.v3+json";

/// Provider settings.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct GithubMetadataSettings {
    /// Where the disk cache lives.
    #[default(PathBuf::from("package-metadata.db"))]
    pub cache_path: PathBuf,

    /// How long cached results are served.
    #[default(DEFAULT_CACHE_TTL_SECS)]
    pub cache_ttl_secs: u64,

    /// Ceiling on the cache file size.
    #[default(DEFAULT_CACHE_SIZE_LIMIT_BYTES)]
    pub cache_size_limit_bytes: u64,

    /// Per-request timeout.
    #[default(DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Warn when the rate-limit budget drops below this.
    #[default(DEFAULT_RATE_LIMIT_WARNING_THRESHOLD)]
    pub rate_limit_warning_threshold: u64,

    /// File containing an API token, first line only.
    #[default(Option::None)]
    pub auth_token_path: Option<PathBuf>,
}

impl GithubMetadataSettings {
    /// Validate raw settings and fill in defaults.
    pub fn deserialize_config(cfg: toml::Value) -> Fallible<Self> {
        let settings: Self = cfg
            .clone()
            .try_into()
            .context(format!("deserializing {:?}", &cfg))?;

        anyhow::ensure!(
            !settings.cache_path.as_os_str().is_empty(),
            "empty cache_path"
        );

        Ok(settings)
    }
}

/// A contributor to a package.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PackageAuthor {
    /// Login on the code-hosting service.
    pub username: String,
    /// Profile page.
    pub url: Option<String>,
}

/// Aggregate metadata composed from the fan-out.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PackageBasicMetadata {
    /// Repository description.
    pub summary: Option<String>,
    /// Repository topics.
    pub keywords: Option<Vec<String>>,
    /// Release tags that parse as semver, newest response order.
    pub versions: Vec<Version>,
    /// Contributors.
    pub authors: Option<Vec<PackageAuthor>>,
    /// Raw readme location.
    pub readme_url: Option<String>,
    /// Raw license location.
    pub license_url: Option<String>,
    /// Languages present in the repository.
    pub languages: Option<Vec<String>>,
    /// Watcher count at processing time.
    pub watchers_count: Option<i64>,
    /// When this record was composed, seconds since the epoch.
    pub processed_at_epoch_secs: u64,
}

/// Metadata provider backed by the GitHub v3 API.
#[derive(Debug)]
pub struct GithubPackageMetadataProvider {
    settings: GithubMetadataSettings,
    hclient: reqwest::Client,
    cache: DiskCache,
    breaker: CircuitBreaker,
    auth_token: Option<String>,
    api_base_override: Option<Url>,
}

impl GithubPackageMetadataProvider {
    /// Instantiate a provider from `settings`.
    pub fn try_new(settings: GithubMetadataSettings) -> Fallible<Self> {
        let auth_token = settings
            .auth_token_path
            .as_ref()
            .map(commons::read_credentials)
            .transpose()
            .context("could not read API credentials")?;

        let hclient = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("building reqwest client")?;

        let cache = DiskCache::open(
            &settings.cache_path,
            Duration::from_secs(settings.cache_ttl_secs),
            settings.cache_size_limit_bytes,
        )?;

        Ok(Self {
            settings,
            hclient,
            cache,
            breaker: CircuitBreaker::new(
                DEFAULT_BREAKER_MAX_ERRORS,
                Duration::from_secs(DEFAULT_BREAKER_WINDOW_SECS),
            ),
            auth_token,
            api_base_override: None,
        })
    }

    /// Fetch enriched metadata for the package `identity` hosted at
    /// `location`, serving the disk cache within its TTL.
    pub async fn get(
        &self,
        identity: &str,
        location: &Url,
    ) -> Result<PackageBasicMetadata, GithubMetadataError> {
        let api_base = self.api_base(location)?;

        if let Some(cached) = tokio::task::block_in_place(|| self.cache.get(identity))? {
            trace!("serving metadata of {} from cache", identity);
            return Ok(cached);
        }

        trace!("fetching repository metadata from {}", api_base);
        let response = self.get_with_retry(api_base.as_str(), PRIMARY_ACCEPT).await?;
        self.inspect_rate_limits(&response)?;
        let repo: models::Repo = match response.status().as_u16() {
            200 => response.json().await?,
            401 if self.auth_token.is_some() => return Err(GithubMetadataError::InvalidAuthToken),
            401 | 403 => return Err(GithubMetadataError::PermissionDenied),
            404 => return Err(GithubMetadataError::NotFound),
            code => {
                return Err(GithubMetadataError::InvalidResponse(format!(
                    "unexpected status {}",
                    code
                )))
            }
        };

        // Secondary lookups run in parallel; absent data is not an error.
        let releases_url = models::releases_url(&api_base);
        let contributors_url = models::contributors_url(&api_base);
        let readme_url = models::readme_url(&api_base);
        let license_url = models::license_url(&api_base);
        let languages_url = models::languages_url(&api_base);
        let (releases, contributors, readme, license, languages) = futures::join!(
            self.fetch_json::<Vec<models::Release>>(&releases_url),
            self.fetch_json::<Vec<models::Contributor>>(&contributors_url),
            self.fetch_json::<models::Content>(&readme_url),
            self.fetch_json::<models::Content>(&license_url),
            self.fetch_json::<HashMap<String, i64>>(&languages_url),
        );

        let versions = releases
            .unwrap_or_default()
            .into_iter()
            .filter_map(|release| {
                Version::parse(release.tag_name.trim_start_matches('v')).ok()
            })
            .collect();

        let metadata = PackageBasicMetadata {
            summary: repo.description,
            keywords: repo.topics,
            versions,
            authors: contributors.map(|contributors| {
                contributors
                    .into_iter()
                    .map(|contributor| PackageAuthor {
                        username: contributor.login,
                        url: contributor.html_url,
                    })
                    .collect()
            }),
            readme_url: readme.and_then(|content| content.download_url),
            license_url: license.and_then(|content| content.download_url),
            languages: languages.map(|languages| {
                let mut names: Vec<String> = languages.into_keys().collect();
                names.sort();
                names
            }),
            watchers_count: repo.watchers_count,
            processed_at_epoch_secs: now_epoch(),
        };

        tokio::task::block_in_place(|| self.cache.put(identity, &metadata))?;
        Ok(metadata)
    }

    fn api_base(&self, location: &Url) -> Result<Url, GithubMetadataError> {
        match &self.api_base_override {
            Some(base) => Ok(base.clone()),
            None => models::derive_api_url(location.as_str()),
        }
    }

    fn request(&self, url: &str, accept: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .hclient
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, accept);
        if let Some(token) = &self.auth_token {
            builder = builder.header(reqwest::header::AUTHORIZATION, format!("token {}", token));
        }
        builder
    }

    async fn get_with_retry(
        &self,
        url: &str,
        accept: &str,
    ) -> Result<reqwest::Response, GithubMetadataError> {
        let host = Url::parse(url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default();
        if !self.breaker.allows(&host) {
            return Err(GithubMetadataError::CircuitOpen(host));
        }

        let mut delay = Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.request(url, accept).send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    self.breaker.record_error(&host);
                    if attempt >= DEFAULT_RETRY_ATTEMPTS {
                        return Err(e.into());
                    }
                    trace!("retrying {} after {:?}: {}", url, delay, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    /// An exhausted budget is fatal before any status mapping; a low
    /// one is worth a warning.
    fn inspect_rate_limits(&self, response: &reqwest::Response) -> Result<(), GithubMetadataError> {
        let limit = header_u64(response, "X-RateLimit-Limit");
        if let Some(remaining) = header_u64(response, "X-RateLimit-Remaining") {
            if remaining == 0 {
                return Err(GithubMetadataError::ApiLimitsExceeded {
                    limit: limit.unwrap_or(0),
                });
            }
            if remaining < self.settings.rate_limit_warning_threshold {
                warn!(
                    "approaching API limits, {} requests remaining (limit {})",
                    remaining,
                    limit.unwrap_or(0)
                );
            }
        }
        Ok(())
    }

    /// Fan-out helper: valid only on 200, anything else yields `None`.
    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Option<T> {
        let response = self.get_with_retry(url, FANOUT_ACCEPT).await.ok()?;
        if response.status().as_u16() != 200 {
            return None;
        }
        response.json().await.ok()
    }
}

fn header_u64(response: &reqwest::Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test points at its own repo path so the shared mock server
    // never sees colliding routes across parallel tests.
    fn provider(dir: &std::path::Path, repo: &str) -> GithubPackageMetadataProvider {
        let settings = GithubMetadataSettings {
            cache_path: dir.join("cache.db"),
            ..Default::default()
        };
        let mut provider = GithubPackageMetadataProvider::try_new(settings).unwrap();
        let base = format!("{}/repos/mona/{}", mockito::server_url(), repo);
        provider.api_base_override = Some(Url::parse(&base).unwrap());
        provider
    }

    fn location() -> Url {
        Url::parse("https://github.com/mona/LinkedList").unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn composes_aggregate_record_and_caches_it() {
        commons::testing::init_logger();

        let primary = mockito::mock("GET", "/repos/mona/LinkedList")
            .with_status(200)
            .with_header("x-ratelimit-limit", "5000")
            .with_header("x-ratelimit-remaining", "4999")
            .with_body(
                r#"{"name":"LinkedList","full_name":"mona/LinkedList","description":"One thing links to another.","topics":["swift"],"watchers_count":542}"#,
            )
            .expect(1)
            .create();
        let _releases = mockito::mock("GET", "/repos/mona/LinkedList/releases?per_page=20")
            .with_status(200)
            .with_body(r#"[{"tag_name":"v1.1.1"},{"tag_name":"1.0.0"},{"tag_name":"nightly"}]"#)
            .create();
        let _contributors = mockito::mock("GET", "/repos/mona/LinkedList/contributors")
            .with_status(200)
            .with_body(r#"[{"login":"mona","html_url":"https://github.com/mona","contributions":42}]"#)
            .create();
        let _readme = mockito::mock("GET", "/repos/mona/LinkedList/readme")
            .with_status(200)
            .with_body(r#"{"download_url":"https://raw.example.com/README.md"}"#)
            .create();
        let _license = mockito::mock("GET", "/repos/mona/LinkedList/license")
            .with_status(404)
            .create();
        let _languages = mockito::mock("GET", "/repos/mona/LinkedList/languages")
            .with_status(200)
            .with_body(r#"{"Swift":81210,"Shell":523}"#)
            .create();

        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path(), "LinkedList");

        let metadata = provider
            .get("mona.LinkedList", &location())
            .await
            .unwrap();

        assert_eq!(metadata.summary.as_deref(), Some("One thing links to another."));
        assert_eq!(
            metadata.versions,
            vec![
                Version::parse("1.1.1").unwrap(),
                Version::parse("1.0.0").unwrap()
            ]
        );
        assert_eq!(
            metadata.authors,
            Some(vec![PackageAuthor {
                username: "mona".to_string(),
                url: Some("https://github.com/mona".to_string()),
            }])
        );
        assert_eq!(
            metadata.readme_url.as_deref(),
            Some("https://raw.example.com/README.md")
        );
        // The license lookup 404ed; absence is not an error.
        assert_eq!(metadata.license_url, None);
        assert_eq!(
            metadata.languages,
            Some(vec!["Shell".to_string(), "Swift".to_string()])
        );

        // A second lookup is served from the disk cache.
        let again = provider
            .get("mona.LinkedList", &location())
            .await
            .unwrap();
        assert_eq!(again, metadata);
        primary.assert();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_rate_limit_is_fatal() {
        let _primary = mockito::mock("GET", "/repos/mona/RateLimited")
            .with_status(403)
            .with_header("x-ratelimit-limit", "60")
            .with_header("x-ratelimit-remaining", "0")
            .create();

        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path(), "RateLimited");

        let result = provider.get("mona.RateLimited", &location()).await;
        assert!(matches!(
            result,
            Err(GithubMetadataError::ApiLimitsExceeded { limit: 60 })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_repository_maps_to_not_found() {
        let _primary = mockito::mock("GET", "/repos/mona/Missing")
            .with_status(404)
            .create();

        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path(), "Missing");

        let result = provider.get("mona.Missing", &location()).await;
        assert!(matches!(result, Err(GithubMetadataError::NotFound)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn anonymous_401_maps_to_permission_denied() {
        let _primary = mockito::mock("GET", "/repos/mona/Private")
            .with_status(401)
            .create();

        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path(), "Private");

        let result = provider.get("mona.Private", &location()).await;
        assert!(matches!(result, Err(GithubMetadataError::PermissionDenied)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_location_fails_without_io() {
        let dir = tempfile::tempdir().unwrap();
        let settings = GithubMetadataSettings {
            cache_path: dir.path().join("cache.db"),
            ..Default::default()
        };
        let provider = GithubPackageMetadataProvider::try_new(settings).unwrap();

        let location = Url::parse("https://example.com/no-repo-here").unwrap();
        let result = provider.get("mona.LinkedList", &location).await;
        assert!(matches!(result, Err(GithubMetadataError::InvalidGitUrl(_))));
    }
}
