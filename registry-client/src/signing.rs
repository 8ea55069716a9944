//! Signature validation for downloaded archives.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use base64::Engine as _;
use log::warn;
use semver::Version;
use smart_default::SmartDefault;
use url::Url;

use crate::error::RegistryError;
use crate::identity::RegistryIdentity;
use crate::metadata::wire;

/// Formats of detached signatures carried in release metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SignatureFormat {
    /// CMS/PKCS#7, the `cms-1.0.0` wire label.
    #[serde(rename = "cms-1.0.0")]
    Cms1_0_0,
}

impl SignatureFormat {
    /// The wire label of this format.
    pub fn label(&self) -> &'static str {
        match self {
            SignatureFormat::Cms1_0_0 => "cms-1.0.0",
        }
    }
}

impl fmt::Display for SignatureFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for SignatureFormat {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cms-1.0.0" => Ok(SignatureFormat::Cms1_0_0),
            other => Err(RegistryError::UnknownSignatureFormat(other.to_string())),
        }
    }
}

/// How a signing entity was established.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningEntityKind {
    /// Backed by a certificate from a recognized authority.
    Recognized,
    /// Self-issued or otherwise unvetted.
    Unrecognized,
}

/// Verified principal behind a signature.
///
/// Equality compares all fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SigningEntity {
    /// How the entity was established.
    pub kind: SigningEntityKind,
    /// Subject common name.
    pub name: String,
    /// Subject organization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Subject organizational unit.
    #[serde(rename = "organizationalUnit", skip_serializing_if = "Option::is_none")]
    pub organizational_unit: Option<String>,
}

impl fmt::Display for SigningEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.organization {
            Some(organization) => write!(f, "{} ({})", self.name, organization),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Outcome reported by the signature-verification primitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignatureStatus {
    /// The signature verifies and chains to a trusted root.
    Valid(SigningEntity),
    /// The signature does not verify over the content.
    Invalid(String),
    /// The signing certificate failed validation.
    CertificateInvalid(String),
    /// The signing certificate chains to no trusted root.
    CertificateNotTrusted,
}

/// Configuration handed to the signature-verification primitive.
#[derive(Clone, Debug, Default)]
pub struct VerifierConfiguration {
    /// DER-encoded additional trust roots.
    pub trusted_roots: Vec<Vec<u8>>,
    /// Whether the platform trust store is consulted as well.
    pub include_default_trust_store: bool,
}

/// External signature-verification primitive.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Check `signature` over `content`.
    ///
    /// Errors of the primitive itself surface as
    /// [`RegistryError::FailedToValidateSignature`].
    async fn status(
        &self,
        signature: &[u8],
        content: &[u8],
        format: SignatureFormat,
        configuration: &VerifierConfiguration,
    ) -> Result<SignatureStatus, RegistryError>;
}

/// Interactive decisions delegated to the embedding tool.
///
/// Absent delegate means "do not continue" for both hooks.
#[async_trait]
pub trait RegistryClientDelegate: Send + Sync {
    /// Continue although `package` `version` is not signed?
    async fn on_unsigned(&self, registry: &Url, package: &RegistryIdentity, version: &Version)
        -> bool;

    /// Continue although the signing certificate is not trusted?
    async fn on_untrusted(
        &self,
        registry: &Url,
        package: &RegistryIdentity,
        version: &Version,
    ) -> bool;
}

/// Reaction to a policy-relevant signing condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, SmartDefault)]
#[serde(rename_all = "kebab-case")]
pub enum SigningAction {
    /// Ask the delegate whether to continue.
    #[default]
    Prompt,
    /// Fail the operation.
    Error,
    /// Log a warning and continue.
    Warn,
    /// Continue silently.
    SilentAllow,
}

/// Policy for unsigned archives and untrusted certificates.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct SigningPolicy {
    /// Reaction to archives without a signature.
    #[default(SigningAction::Prompt)]
    pub on_unsigned: SigningAction,

    /// Reaction to signers that chain to no trusted root.
    #[default(SigningAction::Prompt)]
    pub on_untrusted_certificate: SigningAction,
}

/// Identifies the release a signature belongs to, for prompts and logs.
pub(crate) struct SignatureContext<'a> {
    pub(crate) registry: &'a Url,
    pub(crate) package: &'a RegistryIdentity,
    pub(crate) version: &'a Version,
}

#[derive(Clone, Copy)]
enum PolicyCondition {
    Unsigned,
    UntrustedCertificate,
}

/// Validate the detached signature over a downloaded source archive.
///
/// Returns the verified signing entity, or `None` when policy waived
/// validation (unsigned or untrusted, allowed by configuration or
/// delegate).
pub(crate) async fn validate_source_archive_signature(
    context: &SignatureContext<'_>,
    metadata: &wire::VersionMetadata,
    content: &[u8],
    policy: &SigningPolicy,
    verifier: Option<&dyn SignatureVerifier>,
    verifier_configuration: &VerifierConfiguration,
    delegate: Option<&dyn RegistryClientDelegate>,
) -> Result<Option<SigningEntity>, RegistryError> {
    let resource = metadata
        .source_archive()
        .ok_or(RegistryError::MissingSourceArchive)?;

    let signing = match &resource.signing {
        Some(signing) => signing,
        None => {
            return apply_policy(
                policy.on_unsigned,
                PolicyCondition::Unsigned,
                context,
                delegate,
            )
            .await;
        }
    };

    let signature_base64 = signing
        .signature_base64
        .as_ref()
        .ok_or(RegistryError::MissingSignatureFormat)?;
    let signature = base64::engine::general_purpose::STANDARD
        .decode(signature_base64)
        .map_err(|e| RegistryError::FailedLoadingSignature(e.to_string()))?;
    let format = signing
        .signature_format
        .as_ref()
        .ok_or(RegistryError::MissingSignatureFormat)?
        .parse::<SignatureFormat>()?;

    let verifier =
        verifier.ok_or_else(|| RegistryError::MissingConfiguration("signature verifier".into()))?;

    match verifier
        .status(&signature, content, format, verifier_configuration)
        .await?
    {
        SignatureStatus::Valid(entity) => Ok(Some(entity)),
        SignatureStatus::Invalid(reason) => Err(RegistryError::InvalidSignature(reason)),
        SignatureStatus::CertificateInvalid(reason) => {
            Err(RegistryError::InvalidSigningCertificate(reason))
        }
        SignatureStatus::CertificateNotTrusted => {
            apply_policy(
                policy.on_untrusted_certificate,
                PolicyCondition::UntrustedCertificate,
                context,
                delegate,
            )
            .await
        }
    }
}

async fn apply_policy(
    action: SigningAction,
    condition: PolicyCondition,
    context: &SignatureContext<'_>,
    delegate: Option<&dyn RegistryClientDelegate>,
) -> Result<Option<SigningEntity>, RegistryError> {
    let error = match condition {
        PolicyCondition::Unsigned => RegistryError::SourceArchiveNotSigned,
        PolicyCondition::UntrustedCertificate => RegistryError::SignerNotTrusted,
    };

    match action {
        SigningAction::Prompt => {
            let allowed = match delegate {
                Some(delegate) => match condition {
                    PolicyCondition::Unsigned => {
                        delegate
                            .on_unsigned(context.registry, context.package, context.version)
                            .await
                    }
                    PolicyCondition::UntrustedCertificate => {
                        delegate
                            .on_untrusted(context.registry, context.package, context.version)
                            .await
                    }
                },
                None => false,
            };
            if allowed {
                Ok(None)
            } else {
                Err(error)
            }
        }
        SigningAction::Error => Err(error),
        SigningAction::Warn => {
            warn!(
                "{} {} from {}: {}",
                context.package, context.version, context.registry, error
            );
            Ok(None)
        }
        SigningAction::SilentAllow => Ok(None),
    }
}
