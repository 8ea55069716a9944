//! Package identities.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::RegistryError;

lazy_static! {
    // Shared by scopes and names: alphanumerical slug with inner `_-`,
    // at most 40 characters.
    static ref IDENTITY_PART_RE: Regex =
        Regex::new("^[A-Za-z0-9](?:[A-Za-z0-9_-]{0,38}[A-Za-z0-9])?$").expect("hardcoded regex");
}

/// Free-form package identity, as supplied by callers.
///
/// Only identities of the `scope.name` shape can be used against a
/// registry; see [`PackageIdentity::registry_identity`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageIdentity(String);

impl PackageIdentity {
    /// Wrap a raw identity string.
    pub fn new<S: Into<String>>(identity: S) -> Self {
        Self(identity.into())
    }

    /// The raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret this identity as a registry identity, if it has the
    /// required `scope.name` shape.
    pub fn registry_identity(&self) -> Option<RegistryIdentity> {
        self.0.parse().ok()
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PackageIdentity {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

/// A package scope, e.g. `mona` in `mona.LinkedList`.
///
/// Comparison and hashing are case-insensitive.
#[derive(Clone, Debug)]
pub struct Scope(String);

impl Scope {
    /// The scope as originally written.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Scope {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if IDENTITY_PART_RE.is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(RegistryError::InvalidPackageIdentity(s.to_string()))
        }
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Scope {}

impl Hash for Scope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A package name, e.g. `LinkedList` in `mona.LinkedList`.
///
/// Comparison and hashing are case-insensitive.
#[derive(Clone, Debug)]
pub struct PackageName(String);

impl PackageName {
    /// The name as originally written.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PackageName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if IDENTITY_PART_RE.is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(RegistryError::InvalidPackageIdentity(s.to_string()))
        }
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for PackageName {}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state)
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `(scope, name)` identity usable with a registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegistryIdentity {
    scope: Scope,
    name: PackageName,
}

impl RegistryIdentity {
    /// The package scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The package name.
    pub fn name(&self) -> &PackageName {
        &self.name
    }
}

impl FromStr for RegistryIdentity {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(scope), Some(name), None) => Ok(Self {
                scope: scope.parse()?,
                name: name.parse()?,
            }),
            _ => Err(RegistryError::InvalidPackageIdentity(s.to_string())),
        }
    }
}

impl fmt::Display for RegistryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.scope, self.name)
    }
}
