//! Metadata enrichment backed by the GitHub v3 REST API.
//!
//! Given a package's source-control location, fans out a handful of
//! REST calls (repository, releases, contributors, readme, license,
//! languages) and composes an aggregate record, backed by a disk cache.

#[macro_use]
extern crate serde_derive;

mod breaker;
mod cache;
pub mod error;
pub mod v3;

pub use crate::error::GithubMetadataError;
pub use crate::v3::{
    GithubMetadataSettings, GithubPackageMetadataProvider, PackageAuthor, PackageBasicMetadata,
};
