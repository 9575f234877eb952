//! Verification of pre-built provenance bundles.
//!
//! Structural checks (envelope, payload, single subject, exact subject
//! match, transparency log entry shape) are done here; the cryptographic
//! check of the envelope is delegated to an [`EnvelopeVerifier`]. Every
//! failure aborts the publish.

use std::collections::HashMap;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::VerifyingKey;
use tracing::debug;

use crate::error::{PublishError, PublishResult};

use super::dsse::{compute_key_id, verify_signature};
use super::{DsseEnvelope, ProvenanceBundle, Statement, Subject, INTOTO_PAYLOAD_TYPE};

/// Verification material fields that hold a signing certificate.
const CERTIFICATE_FIELDS: [&str; 2] = ["x509CertificateChain", "certificate"];

/// Cryptographic verification of a bundle's envelope.
pub trait EnvelopeVerifier: Send + Sync {
    /// `payload` is the already-decoded envelope payload.
    fn verify_envelope(
        &self,
        bundle: &ProvenanceBundle,
        envelope: &DsseEnvelope,
        payload: &[u8],
    ) -> PublishResult<()>;
}

/// Verifies Ed25519 DSSE signatures against a fixed set of trusted keys.
///
/// Signatures are matched to keys by `keyid`, falling back to the bundle's
/// public key hint. Bundles that carry only a signing certificate (keyless
/// signing) are rejected.
#[derive(Debug, Clone, Default)]
pub struct TrustedKeyVerifier {
    keys: HashMap<String, VerifyingKey>,
}

impl TrustedKeyVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust a key; returns its key ID.
    pub fn add_key(&mut self, key: VerifyingKey) -> PublishResult<String> {
        let key_id = compute_key_id(&key)?;
        self.keys.insert(key_id.clone(), key);
        Ok(key_id)
    }

    /// Trust a key given as Base64 SPKI DER.
    pub fn add_spki_base64(&mut self, spki_b64: &str) -> PublishResult<String> {
        let der = BASE64.decode(spki_b64.trim()).map_err(|e| PublishError::Config {
            message: format!("invalid base64 public key: {e}"),
        })?;
        let key = VerifyingKey::from_public_key_der(&der).map_err(|e| PublishError::Config {
            message: format!("invalid SPKI public key: {e}"),
        })?;
        self.add_key(key)
    }

    pub fn with_key(mut self, key: VerifyingKey) -> PublishResult<Self> {
        self.add_key(key)?;
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl EnvelopeVerifier for TrustedKeyVerifier {
    fn verify_envelope(
        &self,
        bundle: &ProvenanceBundle,
        envelope: &DsseEnvelope,
        payload: &[u8],
    ) -> PublishResult<()> {
        if envelope.payload_type != INTOTO_PAYLOAD_TYPE {
            return Err(PublishError::provenance(format!(
                "payload type mismatch: expected {}, got {}",
                INTOTO_PAYLOAD_TYPE, envelope.payload_type
            )));
        }

        if envelope.signatures.is_empty() {
            return Err(PublishError::provenance("no signatures in envelope"));
        }

        let material = bundle.verification_material.as_ref();
        let hint = material
            .and_then(|m| m.public_key.as_ref())
            .map(|k| k.hint.as_str());

        let keyless = envelope.signatures.iter().all(|sig| sig.key_id.is_empty());
        let has_certificate = material.is_some_and(|m| {
            CERTIFICATE_FIELDS
                .iter()
                .any(|field| m.extra.contains_key(*field))
        });
        if keyless && hint.is_none() && has_certificate {
            return Err(PublishError::provenance(
                "certificate-based provenance bundles are not supported; \
                 sign with a trusted key or use a certificate-aware verifier",
            ));
        }

        let mut last_error = None;
        for sig in &envelope.signatures {
            let key_id = if sig.key_id.is_empty() {
                hint.unwrap_or_default()
            } else {
                sig.key_id.as_str()
            };

            let Some(key) = self.keys.get(key_id) else {
                last_error = Some(PublishError::provenance(format!(
                    "provenance signed by untrusted key: {key_id}"
                )));
                continue;
            };

            match verify_signature(envelope, payload, &sig.signature, key) {
                Ok(()) => {
                    debug!(key_id, "provenance signature verified");
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| PublishError::provenance("no valid signatures")))
    }
}

/// Checks a provenance bundle against the artifact being published.
pub struct ProvenanceVerifier<'a> {
    envelope_verifier: &'a dyn EnvelopeVerifier,
}

impl<'a> ProvenanceVerifier<'a> {
    pub fn new(envelope_verifier: &'a dyn EnvelopeVerifier) -> Self {
        Self { envelope_verifier }
    }

    /// Read and verify a bundle file.
    pub async fn verify_file(
        &self,
        expected: &Subject,
        path: impl AsRef<Path>,
    ) -> PublishResult<ProvenanceBundle> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            PublishError::provenance(format!("Invalid provenance provided: {e}"))
        })?;
        self.verify(expected, &bytes)
    }

    /// Verify bundle bytes and return the parsed bundle.
    pub fn verify(&self, expected: &Subject, bundle_bytes: &[u8]) -> PublishResult<ProvenanceBundle> {
        let bundle: ProvenanceBundle = serde_json::from_slice(bundle_bytes)
            .map_err(|e| PublishError::provenance(format!("Invalid provenance provided: {e}")))?;

        let envelope = bundle
            .dsse_envelope
            .as_ref()
            .filter(|env| !env.payload.is_empty())
            .ok_or_else(|| {
                PublishError::provenance("No dsseEnvelope with payload found in sigstore bundle")
            })?;

        let payload = BASE64.decode(&envelope.payload).map_err(|e| {
            PublishError::provenance(format!("Failed to parse payload from dsseEnvelope: {e}"))
        })?;
        let statement: Statement = serde_json::from_slice(&payload).map_err(|e| {
            PublishError::provenance(format!("Failed to parse payload from dsseEnvelope: {e}"))
        })?;

        check_subject(expected, &statement.subject)?;
        check_tlog_entry(&bundle)?;
        self.envelope_verifier
            .verify_envelope(&bundle, envelope, &payload)?;

        Ok(bundle)
    }
}

/// The first transparency log entry, when present, must name its log index
/// and carry an inclusion promise or proof.
fn check_tlog_entry(bundle: &ProvenanceBundle) -> PublishResult<()> {
    let Some(entry) = bundle
        .verification_material
        .as_ref()
        .and_then(|m| m.tlog_entries.first())
    else {
        return Ok(());
    };

    if entry.log_index().is_none() {
        return Err(PublishError::provenance(
            "Transparency log entry in sigstore bundle has no logIndex",
        ));
    }
    if !entry.has_inclusion() {
        return Err(PublishError::provenance(
            "Transparency log entry in sigstore bundle has no inclusion promise or proof",
        ));
    }

    Ok(())
}

fn check_subject(expected: &Subject, subjects: &[Subject]) -> PublishResult<()> {
    let actual = match subjects {
        [] => {
            return Err(PublishError::provenance(
                "No subject found in sigstore bundle payload",
            ))
        }
        [single] => single,
        _ => {
            return Err(PublishError::provenance(
                "Found more than one subject in the sigstore bundle payload",
            ))
        }
    };

    if actual.name != expected.name {
        return Err(PublishError::provenance(format!(
            "Provenance subject {} does not match the package: {}",
            actual.name, expected.name
        )));
    }

    let digest_matches = expected
        .digest
        .iter()
        .all(|(alg, hex)| actual.digest.get(alg) == Some(hex));
    if expected.digest.is_empty() || !digest_matches {
        return Err(PublishError::provenance(
            "Provenance subject digest does not match the package",
        ));
    }

    Ok(())
}
