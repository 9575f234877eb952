//! DSSE envelope crypto: PAE encoding, Ed25519 signing and verification.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::pkcs8::EncodePublicKey;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::{PublishError, PublishResult};

use super::{DsseEnvelope, DsseSignature};

/// Build DSSE Pre-Authentication Encoding (PAE).
///
/// PAE(type, payload) = "DSSEv1" SP LEN(type) SP type SP LEN(payload) SP payload
pub(crate) fn build_pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let type_len = payload_type.len().to_string();
    let payload_len = payload.len().to_string();

    let mut pae = Vec::new();
    pae.extend_from_slice(b"DSSEv1 ");
    pae.extend_from_slice(type_len.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload_type.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload_len.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload);
    pae
}

/// Key ID of a public key: `sha256:<hex of SPKI DER>`.
pub fn compute_key_id(key: &VerifyingKey) -> PublishResult<String> {
    let doc = key
        .to_public_key_der()
        .map_err(|e| PublishError::Config {
            message: format!("failed to encode public key: {e}"),
        })?;
    Ok(format!("sha256:{}", hex::encode(Sha256::digest(doc.as_bytes()))))
}

pub(crate) fn sign_envelope(
    payload: &[u8],
    payload_type: &str,
    key: &SigningKey,
    key_id: &str,
) -> DsseEnvelope {
    let pae = build_pae(payload_type, payload);
    let signature = key.sign(&pae);

    DsseEnvelope {
        payload_type: payload_type.to_string(),
        payload: BASE64.encode(payload),
        signatures: vec![DsseSignature {
            key_id: key_id.to_string(),
            signature: BASE64.encode(signature.to_bytes()),
        }],
    }
}

/// Verify one signature over the envelope's PAE.
pub(crate) fn verify_signature(
    envelope: &DsseEnvelope,
    payload: &[u8],
    signature_b64: &str,
    key: &VerifyingKey,
) -> PublishResult<()> {
    let pae = build_pae(&envelope.payload_type, payload);

    let signature_bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| PublishError::provenance(format!("invalid base64 signature: {e}")))?;

    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|e| PublishError::provenance(format!("invalid signature bytes: {e}")))?;

    key.verify(&pae, &signature)
        .map_err(|_| PublishError::provenance("ed25519 verification failed"))
}
