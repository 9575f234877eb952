//! Package identity as seen by the registry.
//!
//! Supported name formats:
//! - `name`
//! - `@scope/name`

use std::fmt;

use crate::config::{FlatConfig, PublishOptions};
use crate::error::{PublishError, PublishResult};

/// A package name bound to a concrete, validated version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    name: String,
    scope: Option<String>,
    version: semver::Version,
}

impl PackageSpec {
    /// Validate a name and version.
    ///
    /// The version is cleaned first (surrounding whitespace and a leading
    /// `v` or `=` are dropped).
    pub fn new(name: &str, version: &str) -> PublishResult<Self> {
        let scope = parse_scope(name)?;
        let version = clean_version(version)
            .ok_or_else(|| PublishError::usage(format!("Invalid version number: `{version}`")))?;

        Ok(Self {
            name: name.to_string(),
            scope,
            version,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope including the leading `@`.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn version(&self) -> &semver::Version {
        &self.version
    }

    /// Name as it appears in a registry URL path (`@scope%2fname`).
    pub fn escaped_name(&self) -> String {
        self.name.replace('/', "%2f")
    }

    /// Package URL form used as the provenance subject name.
    pub fn purl(&self) -> String {
        let name = match self.name.strip_prefix('@') {
            Some(rest) => format!("%40{rest}"),
            None => self.name.clone(),
        };
        format!("pkg:npm/{}@{}", name, self.version)
    }

    /// Attachment name inside the publish document (`{name}-{version}.tgz`).
    pub fn tarball_attachment_name(&self) -> String {
        format!("{}-{}.tgz", self.name, self.version)
    }

    /// Attachment name of the provenance bundle.
    pub fn provenance_attachment_name(&self) -> String {
        format!("{}-{}.sigstore", self.name, self.version)
    }

    /// Local file name the packer would write (`scope-name-1.0.0.tgz`).
    pub fn tarball_file_name(&self) -> String {
        let flat = self.name.replacen('@', "", 1).replacen('/', "-", 1);
        format!("{}-{}.tgz", flat, self.version)
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

fn parse_scope(name: &str) -> PublishResult<Option<String>> {
    if name.is_empty() {
        return Err(PublishError::usage("package name cannot be empty"));
    }

    let Some(rest) = name.strip_prefix('@') else {
        if name.contains('/') {
            return Err(PublishError::usage(format!(
                "Invalid package name: `{name}`"
            )));
        }
        return Ok(None);
    };

    match rest.split_once('/') {
        Some((scope, pkg)) if !scope.is_empty() && !pkg.is_empty() && !pkg.contains('/') => {
            Ok(Some(format!("@{scope}")))
        }
        _ => Err(PublishError::usage(format!(
            "Invalid package name: `{name}`"
        ))),
    }
}

fn clean_version(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('=').unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    semver::Version::parse(trimmed.trim()).ok()
}

/// Normalize a scope to its `@scope` form.
pub(crate) fn normalize_scope(scope: &str) -> String {
    format!("@{}", scope.trim_start_matches('@'))
}

/// Registry configured for a scope (`@scope:registry`).
pub(crate) fn scope_registry<'a>(scope: &str, config: &'a FlatConfig) -> Option<&'a str> {
    config.get_scoped(&normalize_scope(scope), "registry")
}

/// Pick the registry a package publishes to.
///
/// Order: the package's scope registry, the default scope's registry, then
/// `options.registry` (the public registry unless configured).
pub fn pick_registry(spec: &PackageSpec, config: &FlatConfig, options: &PublishOptions) -> String {
    spec.scope()
        .and_then(|scope| scope_registry(scope, config))
        .or_else(|| {
            options
                .scope
                .as_deref()
                .and_then(|scope| scope_registry(scope, config))
        })
        .unwrap_or(options.registry.as_str())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscoped() {
        let spec = PackageSpec::new("left-pad", "1.3.0").unwrap();
        assert_eq!(spec.scope(), None);
        assert_eq!(spec.escaped_name(), "left-pad");
        assert_eq!(spec.purl(), "pkg:npm/left-pad@1.3.0");
        assert_eq!(spec.tarball_attachment_name(), "left-pad-1.3.0.tgz");
        assert_eq!(spec.to_string(), "left-pad@1.3.0");
    }

    #[test]
    fn test_scoped() {
        let spec = PackageSpec::new("@acme/widget", "2.0.0-beta.1").unwrap();
        assert_eq!(spec.scope(), Some("@acme"));
        assert_eq!(spec.escaped_name(), "@acme%2fwidget");
        assert_eq!(spec.purl(), "pkg:npm/%40acme/widget@2.0.0-beta.1");
        assert_eq!(spec.tarball_file_name(), "acme-widget-2.0.0-beta.1.tgz");
        assert_eq!(
            spec.provenance_attachment_name(),
            "@acme/widget-2.0.0-beta.1.sigstore"
        );
    }

    #[test]
    fn test_version_is_cleaned() {
        let spec = PackageSpec::new("pkg", " v1.2.3 ").unwrap();
        assert_eq!(spec.version().to_string(), "1.2.3");
    }

    #[test]
    fn test_invalid_version() {
        let err = PackageSpec::new("pkg", "one.two").unwrap_err();
        assert!(matches!(err, PublishError::Usage { .. }));
        assert_eq!(err.to_string(), "Invalid version number: `one.two`");
    }

    #[test]
    fn test_invalid_names() {
        assert!(PackageSpec::new("", "1.0.0").is_err());
        assert!(PackageSpec::new("@scope", "1.0.0").is_err());
        assert!(PackageSpec::new("@/pkg", "1.0.0").is_err());
        assert!(PackageSpec::new("a/b", "1.0.0").is_err());
    }

    #[test]
    fn test_pick_registry_order() {
        use crate::config::DEFAULT_REGISTRY;

        let spec = PackageSpec::new("@acme/widget", "1.0.0").unwrap();
        let pick = |spec: &PackageSpec, config: &FlatConfig| {
            pick_registry(spec, config, &PublishOptions::from_config(config).unwrap())
        };

        let config = FlatConfig::new();
        assert_eq!(pick(&spec, &config), DEFAULT_REGISTRY);

        let config = config.with("registry", "https://main.example/");
        assert_eq!(pick(&spec, &config), "https://main.example/");

        let config = config
            .with("scope", "other")
            .with("@other:registry", "https://other.example/");
        assert_eq!(pick(&spec, &config), "https://other.example/");

        let config = config.with("@acme:registry", "https://acme.example/");
        assert_eq!(pick(&spec, &config), "https://acme.example/");
    }
}
