//! Multi-algorithm content digests of packed artifacts.
//!
//! `sha512` is the strong algorithm and backs the canonical SRI integrity
//! string. `sha1` is kept for the legacy `shasum` field.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha1::Digest as _;
use sha1::Sha1;
use sha2::Digest as _;
use sha2::Sha512;

/// Hash algorithms computed for every artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashAlgorithm {
    Sha512,
    Sha1,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 2] = [HashAlgorithm::Sha512, HashAlgorithm::Sha1];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha512 => "sha512",
            Self::Sha1 => "sha1",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digests of the raw artifact bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integrity {
    sha512: Vec<u8>,
    sha1: Vec<u8>,
}

impl Integrity {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            sha512: Sha512::digest(bytes).to_vec(),
            sha1: Sha1::digest(bytes).to_vec(),
        }
    }

    pub fn raw(&self, algorithm: HashAlgorithm) -> &[u8] {
        match algorithm {
            HashAlgorithm::Sha512 => &self.sha512,
            HashAlgorithm::Sha1 => &self.sha1,
        }
    }

    /// Lowercase hex digest.
    pub fn hex(&self, algorithm: HashAlgorithm) -> String {
        hex::encode(self.raw(algorithm))
    }

    /// Canonical integrity string (`sha512-<base64>`).
    pub fn sri(&self) -> String {
        format!("sha512-{}", BASE64.encode(&self.sha512))
    }

    /// Legacy sha1 hex digest.
    pub fn shasum(&self) -> String {
        self.hex(HashAlgorithm::Sha1)
    }

    /// Hex digest per algorithm.
    pub fn digests(&self) -> BTreeMap<String, String> {
        HashAlgorithm::ALL
            .iter()
            .map(|alg| (alg.as_str().to_string(), self.hex(*alg)))
            .collect()
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sri())
    }
}
