//! Asynchronous client for Swift-style package registries.
//!
//! Implements the client side of the v1 registry API: release listing,
//! version metadata with TTL caching, manifest retrieval, availability
//! probing, identity lookup, publishing, and a verified download
//! pipeline (signature validation, checksum trust-on-first-use,
//! extraction, provenance sidecar).
//!
//! Archive extraction, signature cryptography, and the persistent trust
//! stores are collaborators supplied by the embedding tool; see the
//! traits in [`fs`], [`signing`], and [`stores`].

#[macro_use]
extern crate serde_derive;

pub mod availability;
mod cache;
pub mod client;
pub mod content;
pub mod download;
pub mod error;
pub mod fs;
pub mod identity;
pub mod links;
pub mod metadata;
mod publish;
pub mod registry;
pub mod signing;
pub mod stores;
pub mod tofu;
pub mod transport;

pub use crate::availability::AvailabilityStatus;
pub use crate::client::{PublishResult, RegistryClient, RegistryClientBuilder};
pub use crate::download::ChecksumAlgorithm;
pub use crate::error::RegistryError;
pub use crate::identity::{PackageIdentity, RegistryIdentity};
pub use crate::metadata::{PackageMetadata, PackageVersionMetadata};
pub use crate::registry::{RegistriesSettings, Registry, RegistryConfiguration};
pub use crate::signing::{SigningEntity, SigningPolicy};
pub use crate::tofu::TofuPolicy;
