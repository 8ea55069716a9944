//! Wire structures and URL helpers for the [GitHub API v3][].
//!
//! [GitHub API v3]: https://developer.github.com/v3/

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use crate::error::GithubMetadataError;

lazy_static! {
    // `host:owner/repo` or `host/owner/repo`, optional scheme or
    // `git@` prefix, optional `.git` suffix.
    static ref SCM_URL_RE: Regex = Regex::new(
        r"^(?:git@|ssh://git@|https?://)?(?P<host>[A-Za-z0-9][A-Za-z0-9.-]*)[:/](?P<owner>[A-Za-z0-9_.-]+)/(?P<repo>[A-Za-z0-9_.-]+?)(?:\.git)?/?$"
    )
    .expect("hardcoded regex");
}

/// Derive the repository API base for a source-control location,
/// `https://api.<host>/repos/<owner>/<repo>`.
pub(crate) fn derive_api_url(scm_url: &str) -> Result<Url, GithubMetadataError> {
    let captures = SCM_URL_RE
        .captures(scm_url)
        .ok_or_else(|| GithubMetadataError::InvalidGitUrl(scm_url.to_string()))?;
    let api = format!(
        "https://api.{}/repos/{}/{}",
        &captures["host"], &captures["owner"], &captures["repo"]
    );
    Url::parse(&api).map_err(|_| GithubMetadataError::InvalidGitUrl(scm_url.to_string()))
}

/// Format the URL to request recent releases.
pub(crate) fn releases_url(base: &Url) -> String {
    format!("{}/releases?per_page=20", base)
}

/// Format the URL to request contributors.
pub(crate) fn contributors_url(base: &Url) -> String {
    format!("{}/contributors", base)
}

/// Format the URL to request the readme descriptor.
pub(crate) fn readme_url(base: &Url) -> String {
    format!("{}/readme", base)
}

/// Format the URL to request the license descriptor.
pub(crate) fn license_url(base: &Url) -> String {
    format!("{}/license", base)
}

/// Format the URL to request the language breakdown.
pub(crate) fn languages_url(base: &Url) -> String {
    format!("{}/languages", base)
}

/// Repository structure.
#[derive(Debug, Deserialize, PartialEq)]
pub(crate) struct Repo {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) topics: Option<Vec<String>>,
    pub(crate) watchers_count: Option<i64>,
}

/// Release structure.
#[derive(Debug, Deserialize, PartialEq)]
pub(crate) struct Release {
    pub(crate) tag_name: String,
    pub(crate) name: Option<String>,
}

/// Contributor structure.
#[derive(Debug, Deserialize, PartialEq)]
pub(crate) struct Contributor {
    pub(crate) login: String,
    pub(crate) html_url: Option<String>,
    pub(crate) contributions: Option<i64>,
}

/// Readme and license descriptors share this shape.
#[derive(Debug, Deserialize, PartialEq)]
pub(crate) struct Content {
    pub(crate) download_url: Option<String>,
}
