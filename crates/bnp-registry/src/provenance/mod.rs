//! Build provenance attestations (SLSA predicates in in-toto statements).
//!
//! Generation happens in CI: the provider is detected once from the
//! environment, it builds its own statement, and the serialized statement is
//! handed to an [`AttestationSigner`] which returns a signed bundle.
//! Pre-built bundles are checked by [`ProvenanceVerifier`].

mod ci;
mod dsse;
mod github;
mod gitlab;
mod signer;
mod verify;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifact::{HashAlgorithm, Integrity};
use crate::client::RegistryClient;
use crate::config::{Access, PublishOptions};
use crate::error::{PublishError, PublishResult};
use crate::package::PackageSpec;

pub use ci::{CiEnvironment, CiProvider};
pub use dsse::compute_key_id;
pub use signer::Ed25519Signer;
pub use verify::{EnvelopeVerifier, ProvenanceVerifier, TrustedKeyVerifier};

/// Payload type of in-toto statements inside DSSE envelopes.
pub const INTOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";
pub const INTOTO_STATEMENT_V01_TYPE: &str = "https://in-toto.io/Statement/v0.1";
pub const INTOTO_STATEMENT_V1_TYPE: &str = "https://in-toto.io/Statement/v1";
pub const SLSA_PREDICATE_V02_TYPE: &str = "https://slsa.dev/provenance/v0.2";
pub const SLSA_PREDICATE_V1_TYPE: &str = "https://slsa.dev/provenance/v1";

/// Media type of the bundles this crate produces.
pub const BUNDLE_MEDIA_TYPE: &str = "application/vnd.dev.sigstore.bundle+json;version=0.2";

const TLOG_BASE_URL: &str = "https://search.sigstore.dev/";

/// The artifact an attestation is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Package URL (`pkg:npm/name@version`).
    pub name: String,

    /// Algorithm -> hex digest.
    #[serde(default)]
    pub digest: BTreeMap<String, String>,
}

impl Subject {
    /// Subject for a package, keyed by its sha512 digest.
    pub fn for_package(spec: &PackageSpec, integrity: &Integrity) -> Self {
        let mut digest = BTreeMap::new();
        digest.insert(
            HashAlgorithm::Sha512.as_str().to_string(),
            integrity.hex(HashAlgorithm::Sha512),
        );
        Self {
            name: spec.purl(),
            digest,
        }
    }
}

/// Unsigned in-toto statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,

    #[serde(default)]
    pub subject: Vec<Subject>,

    #[serde(rename = "predicateType")]
    pub predicate_type: String,

    #[serde(default)]
    pub predicate: serde_json::Value,
}

/// DSSE envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsseEnvelope {
    #[serde(rename = "payloadType", default)]
    pub payload_type: String,

    /// Base64-encoded payload.
    #[serde(default)]
    pub payload: String,

    #[serde(default)]
    pub signatures: Vec<DsseSignature>,
}

/// DSSE signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsseSignature {
    #[serde(rename = "keyid", default)]
    pub key_id: String,

    /// Base64-encoded signature.
    #[serde(rename = "sig")]
    pub signature: String,
}

/// Transparency log entry of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlogEntry {
    /// String in the JSON encoding, tolerated as a number.
    #[serde(default)]
    pub log_index: serde_json::Value,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TlogEntry {
    /// Whether the entry carries a signed inclusion promise or an inclusion
    /// proof.
    pub fn has_inclusion(&self) -> bool {
        ["inclusionPromise", "inclusionProof"]
            .iter()
            .any(|key| self.extra.get(*key).is_some_and(|v| v.is_object()))
    }

    pub fn log_index(&self) -> Option<String> {
        match &self.log_index {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyHint {
    pub hint: String,
}

/// Material needed to verify the envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMaterial {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKeyHint>,

    #[serde(default)]
    pub tlog_entries: Vec<TlogEntry>,

    /// Certificates, timestamps and anything else the signer attached.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Signed provenance bundle, attached to the publish as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceBundle {
    #[serde(default)]
    pub media_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_material: Option<VerificationMaterial>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsse_envelope: Option<DsseEnvelope>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProvenanceBundle {
    /// Lookup URL of the first transparency log entry.
    pub fn transparency_log_url(&self) -> Option<String> {
        let entry = self.verification_material.as_ref()?.tlog_entries.first()?;
        Some(format!("{}?logIndex={}", TLOG_BASE_URL, entry.log_index()?))
    }
}

/// External signing/attestation service.
#[async_trait]
pub trait AttestationSigner: Send + Sync {
    /// Sign `payload` and return the enveloped bundle.
    async fn attest(&self, payload: &[u8], payload_type: &str) -> PublishResult<ProvenanceBundle>;
}

/// Builds and signs provenance for the current CI run.
pub struct ProvenanceBuilder<'a> {
    env: &'a CiEnvironment,
    provider: CiProvider,
}

impl<'a> ProvenanceBuilder<'a> {
    /// Detect the provider once.
    pub fn new(env: &'a CiEnvironment) -> Self {
        Self {
            env,
            provider: CiProvider::detect(env),
        }
    }

    pub fn provider(&self) -> &CiProvider {
        &self.provider
    }

    /// Fail unless the provider is supported and its identity token is
    /// available.
    pub fn ensure_supported(&self) -> PublishResult<()> {
        self.provider.ensure_identity_token(self.env)
    }

    /// Unsigned statement for the given subjects.
    pub fn statement(&self, subjects: Vec<Subject>) -> PublishResult<Statement> {
        self.provider.statement(subjects, self.env)
    }

    /// Build the statement and have it signed.
    pub async fn build(
        &self,
        subjects: Vec<Subject>,
        signer: &dyn AttestationSigner,
    ) -> PublishResult<ProvenanceBundle> {
        self.ensure_supported()?;
        let statement = self.statement(subjects)?;
        let payload = serde_json::to_vec(&statement).map_err(|e| {
            PublishError::provenance(format!("failed to serialize provenance statement: {e}"))
        })?;

        debug!(
            provider = self.provider.name(),
            predicate_type = %statement.predicate_type,
            "signing provenance statement"
        );
        let bundle = signer.attest(&payload, INTOTO_PAYLOAD_TYPE).await?;

        info!(
            provider = self.provider.name(),
            "signed provenance statement with source and build information"
        );
        if let Some(url) = bundle.transparency_log_url() {
            info!(url = %url, "provenance statement published to transparency log");
        }

        Ok(bundle)
    }
}

/// Check the preconditions of provenance generation.
///
/// Provider support and the identity token are checked first. When access
/// is not `public`, the registry is asked whether the package is already
/// public; a 404 means new or private. Provenance for a package that is not
/// public is refused.
pub async fn ensure_provenance_generation(
    client: &RegistryClient,
    spec: &PackageSpec,
    opts: &PublishOptions,
    env: &CiEnvironment,
) -> PublishResult<()> {
    CiProvider::detect(env).ensure_identity_token(env)?;

    if opts.access == Some(Access::Public) {
        return Ok(());
    }

    let visibility = client.package_visibility(spec).await?;
    debug!(package = %spec, public = visibility.public, "package visibility");

    if !visibility.public && opts.provenance {
        return Err(PublishError::provenance(
            "Can't generate provenance for new or private package, you must set `access` to public.",
        ));
    }
    Ok(())
}
