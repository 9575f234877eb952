//! The publish transaction.
//!
//! Stages run strictly in order and any failure aborts the whole publish:
//!
//! 1. inspect the tarball (manifest, integrity)
//! 2. resolve the credential for the target registry
//! 3. generate or verify provenance, when requested
//! 4. PUT the publish document (the only durable effect)

mod metadata;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::artifact::{self, TarballSummary};
use crate::auth::{self, Credential, ResolveOptions};
use crate::client::RegistryClient;
use crate::config::{Access, FlatConfig, ForceAuth, PublishOptions};
use crate::error::{PublishError, PublishResult};
use crate::package::{normalize_scope, pick_registry, PackageSpec};
use crate::provenance::{
    ensure_provenance_generation, AttestationSigner, CiEnvironment, EnvelopeVerifier,
    ProvenanceBuilder, ProvenanceBundle, ProvenanceVerifier, Subject,
};

pub use metadata::{build_metadata, Attachment, MetadataOptions, PublishMetadataDocument};

/// Outcome of a successful publish.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    /// `name@version`.
    pub id: String,
    pub registry: String,
    pub summary: TarballSummary,
    /// Lookup URL of the provenance transparency log entry, if any.
    pub transparency_log_url: Option<String>,
}

/// Publishes packed tarballs to a registry.
///
/// ```no_run
/// # async fn run(tarball: Vec<u8>, manifest: serde_json::Map<String, serde_json::Value>)
/// #     -> bnp_registry::PublishResult<()> {
/// use bnp_registry::{FlatConfig, Publisher};
///
/// let config = FlatConfig::new().with("//registry.npmjs.org/:_authToken", "secret");
/// let receipt = Publisher::new(&config)?.publish(&manifest, &tarball).await?;
/// println!("published {}", receipt.id);
/// # Ok(())
/// # }
/// ```
pub struct Publisher<'a> {
    config: &'a FlatConfig,
    options: PublishOptions,
    force_auth: Option<&'a ForceAuth>,
    env: CiEnvironment,
    signer: Option<&'a dyn AttestationSigner>,
    envelope_verifier: Option<&'a dyn EnvelopeVerifier>,
}

impl<'a> Publisher<'a> {
    /// Publisher with options read from `config` and the process CI
    /// environment.
    pub fn new(config: &'a FlatConfig) -> PublishResult<Self> {
        Ok(Self {
            config,
            options: PublishOptions::from_config(config)?,
            force_auth: None,
            env: CiEnvironment::from_process_env(),
            signer: None,
            envelope_verifier: None,
        })
    }

    pub fn with_options(mut self, options: PublishOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_force_auth(mut self, force_auth: &'a ForceAuth) -> Self {
        self.force_auth = Some(force_auth);
        self
    }

    pub fn with_ci_environment(mut self, env: CiEnvironment) -> Self {
        self.env = env;
        self
    }

    /// Signing service used when `provenance` is enabled.
    pub fn with_signer(mut self, signer: &'a dyn AttestationSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Envelope verification used for `provenance_file` bundles.
    pub fn with_envelope_verifier(mut self, verifier: &'a dyn EnvelopeVerifier) -> Self {
        self.envelope_verifier = Some(verifier);
        self
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    /// Registry the package goes to: the package scope's registry, the
    /// default scope's registry, then `registry`.
    pub fn registry_for(&self, spec: &PackageSpec) -> String {
        pick_registry(spec, self.config, &self.options)
    }

    /// Publish `tarball`, described by its `manifest` (`package.json`).
    pub async fn publish(
        &self,
        manifest: &Map<String, Value>,
        tarball: &[u8],
    ) -> PublishResult<PublishReceipt> {
        let spec = spec_from_manifest(manifest)?;

        if spec.scope().is_none() && self.options.access == Some(Access::Restricted) {
            return Err(PublishError::usage(
                "You cannot publish a restricted package without a scope.",
            ));
        }

        let (files, integrity) = artifact::inspect(tarball)?;
        let summary = TarballSummary::new(&spec, tarball.len(), &files, &integrity);
        summary.log();

        let registry = self.registry_for(&spec);
        let credential = self.resolve_credential(&registry, &spec)?;
        let client = RegistryClient::new(&registry, &self.options, &credential)?;

        let subject = Subject::for_package(&spec, &integrity);
        let provenance = self.provenance(&client, &spec, subject).await?;
        let transparency_log_url = provenance
            .as_ref()
            .and_then(ProvenanceBundle::transparency_log_url);

        let document = build_metadata(
            &spec,
            manifest,
            tarball,
            &integrity,
            MetadataOptions {
                registry: &registry,
                access: self.options.access,
                tag: &self.options.tag,
                provenance: provenance.as_ref(),
            },
        )?;
        let body = serde_json::to_value(&document).map_err(|e| PublishError::InvalidResponse {
            message: format!("failed to serialize publish document: {e}"),
        })?;

        client.put_package(&spec, &body).await?;
        info!(package = %spec, registry = %registry, "published");

        Ok(PublishReceipt {
            id: spec.to_string(),
            registry,
            summary,
            transparency_log_url,
        })
    }

    fn resolve_credential(&self, registry: &str, spec: &PackageSpec) -> PublishResult<Credential> {
        let scope = spec
            .scope()
            .map(String::from)
            .or_else(|| self.options.scope.as_deref().map(normalize_scope));

        let credential = auth::resolve(
            registry,
            self.config,
            ResolveOptions {
                force_auth: self.force_auth,
                scope: scope.as_deref(),
            },
        )?;
        debug!(
            registry,
            reg_key = ?credential.reg_key.as_ref().map(|k| k.as_str()),
            anonymous = credential.is_anonymous(),
            "resolved credential"
        );
        Ok(credential)
    }

    /// Generated provenance wins over a provided bundle file.
    async fn provenance(
        &self,
        client: &RegistryClient,
        spec: &PackageSpec,
        subject: Subject,
    ) -> PublishResult<Option<ProvenanceBundle>> {
        if self.options.provenance {
            let signer = self.signer.ok_or_else(|| PublishError::Config {
                message: "provenance requested but no attestation signer is configured".into(),
            })?;
            ensure_provenance_generation(client, spec, &self.options, &self.env).await?;
            let bundle = ProvenanceBuilder::new(&self.env)
                .build(vec![subject], signer)
                .await?;
            return Ok(Some(bundle));
        }

        if let Some(path) = &self.options.provenance_file {
            let verifier = self.envelope_verifier.ok_or_else(|| PublishError::Config {
                message: "provenance file given but no envelope verifier is configured".into(),
            })?;
            let bundle = ProvenanceVerifier::new(verifier)
                .verify_file(&subject, path)
                .await?;
            debug!(path = %path, "verified provenance bundle");
            return Ok(Some(bundle));
        }

        Ok(None)
    }
}

/// Package identity from the manifest's `name` and `version`.
fn spec_from_manifest(manifest: &Map<String, Value>) -> PublishResult<PackageSpec> {
    let field = |key: &str| {
        manifest
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| PublishError::usage(format!("package manifest has no `{key}`")))
    };
    PackageSpec::new(field("name")?, field("version")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::test_support::tarball;
    use serde_json::json;

    fn manifest(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("manifest must be an object"),
        }
    }

    #[tokio::test]
    async fn test_restricted_without_scope_is_usage_error() {
        let config = FlatConfig::new().with("access", "restricted");
        let publisher = Publisher::new(&config)
            .unwrap()
            .with_ci_environment(CiEnvironment::default());

        let err = publisher
            .publish(
                &manifest(json!({ "name": "widget", "version": "1.0.0" })),
                &tarball(&[("package/index.js", b"x")]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Usage { .. }));
        assert_eq!(
            err.to_string(),
            "You cannot publish a restricted package without a scope."
        );
    }

    #[tokio::test]
    async fn test_manifest_without_version() {
        let config = FlatConfig::new();
        let publisher = Publisher::new(&config).unwrap();
        let err = publisher
            .publish(&manifest(json!({ "name": "widget" })), b"")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "package manifest has no `version`");
    }

    #[tokio::test]
    async fn test_corrupt_tarball_aborts_before_network() {
        let config = FlatConfig::new().with("registry", "http://127.0.0.1:9/");
        let publisher = Publisher::new(&config).unwrap();
        let err = publisher
            .publish(
                &manifest(json!({ "name": "widget", "version": "1.0.0" })),
                &[0x1f, 0x8b, 0x00, 0x01, 0x02],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Integrity { .. }));
    }

    #[tokio::test]
    async fn test_provenance_without_signer() {
        let config = FlatConfig::new().with("registry", "http://127.0.0.1:9/");
        let publisher = Publisher::new(&config)
            .unwrap()
            .with_options(
                PublishOptions::default()
                    .with_registry("http://127.0.0.1:9/")
                    .with_provenance(true),
            );
        let err = publisher
            .publish(
                &manifest(json!({ "name": "widget", "version": "1.0.0" })),
                &tarball(&[("package/index.js", b"x")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Config { .. }));
    }

    #[test]
    fn test_registry_for_scope() {
        let config = FlatConfig::new()
            .with("registry", "https://main.example/")
            .with("@acme:registry", "https://acme.example/")
            .with("@team:registry", "https://team.example/");

        let publisher = Publisher::new(&config).unwrap();
        let scoped = PackageSpec::new("@acme/widget", "1.0.0").unwrap();
        let plain = PackageSpec::new("widget", "1.0.0").unwrap();
        assert_eq!(publisher.registry_for(&scoped), "https://acme.example/");
        assert_eq!(publisher.registry_for(&plain), "https://main.example/");

        let mut options = PublishOptions::from_config(&config).unwrap();
        options.scope = Some("team".into());
        let publisher = publisher.with_options(options);
        assert_eq!(publisher.registry_for(&plain), "https://team.example/");
    }
}
