//! Key-based attestation signer.

use std::path::Path;

use async_trait::async_trait;
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::SigningKey;

use crate::error::{PublishError, PublishResult};

use super::dsse::{compute_key_id, sign_envelope};
use super::{
    AttestationSigner, ProvenanceBundle, PublicKeyHint, VerificationMaterial, BUNDLE_MEDIA_TYPE,
};

/// Signs statements with a local Ed25519 key.
///
/// The bundle names the key by hint instead of carrying a certificate, and
/// has no transparency log entry.
pub struct Ed25519Signer {
    key: SigningKey,
    key_id: String,
}

impl Ed25519Signer {
    pub fn new(key: SigningKey) -> PublishResult<Self> {
        let key_id = compute_key_id(&key.verifying_key())?;
        Ok(Self { key, key_id })
    }

    /// Load a PKCS#8 PEM private key.
    pub fn from_pem_file(path: impl AsRef<Path>) -> PublishResult<Self> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| PublishError::Config {
            message: format!("failed to read signing key {}: {e}", path.display()),
        })?;
        let key = SigningKey::from_pkcs8_pem(&pem).map_err(|e| PublishError::Config {
            message: format!("invalid signing key {}: {e}", path.display()),
        })?;
        Self::new(key)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.key.verifying_key()
    }
}

#[async_trait]
impl AttestationSigner for Ed25519Signer {
    async fn attest(&self, payload: &[u8], payload_type: &str) -> PublishResult<ProvenanceBundle> {
        let envelope = sign_envelope(payload, payload_type, &self.key, &self.key_id);

        Ok(ProvenanceBundle {
            media_type: BUNDLE_MEDIA_TYPE.to_string(),
            verification_material: Some(VerificationMaterial {
                public_key: Some(PublicKeyHint {
                    hint: self.key_id.clone(),
                }),
                ..VerificationMaterial::default()
            }),
            dsse_envelope: Some(envelope),
            extra: serde_json::Map::new(),
        })
    }
}
