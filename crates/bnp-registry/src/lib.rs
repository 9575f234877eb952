//! Package publishing core for npm-compatible registries.
//!
//! This crate implements the publish pipeline of a package release tool:
//!
//! - Credential resolution from flat registry configuration
//! - Tarball inspection (file manifest, bundled dependencies, integrity)
//! - Build provenance for GitHub Actions and GitLab CI
//! - Verification of pre-built provenance bundles
//! - The registry write itself, with retry for transient failures
//!
//! # Quick Start
//!
//! ```no_run
//! use bnp_registry::{FlatConfig, Publisher};
//!
//! # async fn example(tarball: Vec<u8>) -> bnp_registry::PublishResult<()> {
//! let config = FlatConfig::new()
//!     .with("registry", "https://registry.example.com/")
//!     .with("//registry.example.com/:_authToken", "secret");
//!
//! let manifest = serde_json::json!({ "name": "widget", "version": "1.0.0" });
//! let manifest = manifest.as_object().cloned().unwrap_or_default();
//!
//! let receipt = Publisher::new(&config)?.publish(&manifest, &tarball).await?;
//! println!("published {} ({})", receipt.id, receipt.summary.integrity);
//! # Ok(())
//! # }
//! ```
//!
//! # Authentication
//!
//! Credentials are looked up under `{registryKey}:{field}` keys, trying the
//! longest path prefix of the registry URL first:
//!
//! - `_authToken`: bearer token
//! - `_auth`: pre-encoded basic auth
//! - `username` + `_password`: basic auth (password stored base64-encoded)
//! - `certfile` + `keyfile`: client certificate
//!
//! A [`ForceAuth`] override replaces the configuration for the lookup.
//!
//! # Configuration
//!
//! | Key | Description |
//! |-----|-------------|
//! | `registry` | Registry URL (default: `https://registry.npmjs.org/`) |
//! | `@scope:registry` | Registry for a scope |
//! | `timeout` | Request timeout in milliseconds (default: 30000) |
//! | `retry` | Max retries for transient failures (default: 0) |
//! | `access` | `public` or `restricted` |
//! | `tag` | Dist-tag (default: `latest`) |
//! | `provenance` | Generate provenance in CI |
//! | `provenanceFile` | Verify and attach a provenance bundle |
//! | `otp` | One-time password |

pub mod artifact;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod package;
pub mod provenance;
pub mod publish;

// Re-export main types
pub use artifact::{inspect, ArtifactManifest, FileEntry, HashAlgorithm, Integrity, TarballSummary};
pub use auth::{resolve, AuthKey, AuthMaterial, Credential, RegistryKey, ResolveOptions};
pub use client::{RegistryClient, Visibility};
pub use config::{Access, FlatConfig, ForceAuth, PublishOptions, DEFAULT_REGISTRY};
pub use error::{PublishError, PublishResult};
pub use package::{pick_registry, PackageSpec};
pub use provenance::{
    compute_key_id, ensure_provenance_generation, AttestationSigner, CiEnvironment, CiProvider,
    DsseEnvelope, DsseSignature, Ed25519Signer, EnvelopeVerifier, ProvenanceBuilder,
    ProvenanceBundle, ProvenanceVerifier, Statement, Subject, TrustedKeyVerifier,
};
pub use publish::{
    build_metadata, Attachment, MetadataOptions, PublishMetadataDocument, PublishReceipt,
    Publisher,
};

/// User agent sent when none is configured.
pub const REGISTRY_USER_AGENT: &str = concat!("bnp-registry/", env!("CARGO_PKG_VERSION"));
