//! Credential resolution for registry requests.
//!
//! Per-registry credentials live in the flat configuration under composite
//! keys:
//!
//! ```text
//! //registry.example.com/:_authToken = <token>
//! //registry.example.com/:_auth      = <base64 user:pass>
//! //registry.example.com/:username   = <user>
//! //registry.example.com/:_password  = <base64 password>
//! //registry.example.com/:certfile   = /path/cert.pem
//! //registry.example.com/:keyfile    = /path/key.pem
//! ```
//!
//! The resolver tries every [`RegistryKey`] candidate of the target URI,
//! longest first, and uses the first prefix that carries auth.

mod key;

use std::io::ErrorKind;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD as BASE64};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use tracing::debug;

use crate::config::{FlatConfig, ForceAuth};
use crate::error::{PublishError, PublishResult};
use crate::package::scope_registry;

pub use key::RegistryKey;
use key::same_host;

/// Which configuration field satisfied the lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKey {
    AuthToken,
    Auth,
    Username,
    CertFile,
}

impl AuthKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthToken => "_authToken",
            Self::Auth => "_auth",
            Self::Username => "username",
            Self::CertFile => "certfile",
        }
    }
}

/// Auth material carried by a credential. At most one form is populated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthMaterial {
    /// Anonymous access.
    #[default]
    None,

    /// Bearer token.
    Token(String),

    /// Base64 `user:password` for the `Basic` scheme.
    Basic(String),

    /// Client certificate and key (PEM contents).
    ClientCert { cert: String, key: String },
}

/// Resolved credential for one registry request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credential {
    /// Registry key whose settings were used.
    pub reg_key: Option<RegistryKey>,

    /// Field that made `reg_key` match.
    pub auth_key: Option<AuthKey>,

    /// Key of the scope registry when auth was looked up there.
    pub scope_auth_key: Option<RegistryKey>,

    pub material: AuthMaterial,
}

impl Credential {
    /// Credential without auth material.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            material: AuthMaterial::Token(token.into()),
            ..Self::default()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.material == AuthMaterial::None
    }

    pub fn is_basic_auth(&self) -> bool {
        matches!(self.material, AuthMaterial::Basic(_))
    }

    /// Value of the `authorization` header, if any.
    pub fn authorization_header(&self) -> Option<String> {
        match &self.material {
            AuthMaterial::Token(token) => Some(format!("Bearer {token}")),
            AuthMaterial::Basic(auth) => Some(format!("Basic {auth}")),
            AuthMaterial::ClientCert { .. } | AuthMaterial::None => None,
        }
    }
}

/// Extra inputs to [`resolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions<'a> {
    /// Explicit override; replaces the configuration for key lookup.
    pub force_auth: Option<&'a ForceAuth>,

    /// Scope of the package being published (`@scope`).
    pub scope: Option<&'a str>,
}

/// Resolve the credential for a request to `uri`.
///
/// Falls back to an anonymous credential when nothing matches. The only
/// failure besides malformed input is an unsatisfiable `force_auth`.
pub fn resolve(uri: &str, config: &FlatConfig, opts: ResolveOptions<'_>) -> PublishResult<Credential> {
    let lookup = opts.force_auth.map(ForceAuth::fields).unwrap_or(config);

    if let Some((reg_key, auth_key)) = find_auth_key(uri, lookup)? {
        debug!(reg_key = %reg_key, auth_key = auth_key.as_str(), "matched registry credentials");
        let fields = RawFields::at(lookup, &reg_key);
        let material = fields.into_material()?;
        return Ok(Credential {
            reg_key: Some(reg_key),
            auth_key: Some(auth_key),
            scope_auth_key: None,
            material,
        });
    }

    if let Some(force) = opts.force_auth {
        return credential_from_override(force);
    }

    let default_registry = config.get("registry");
    let registry = opts
        .scope
        .and_then(|scope| scope_registry(scope, config))
        .or(default_registry);

    if let Some(registry) = registry {
        if uri != registry && same_host(uri, registry)? {
            debug!(registry, "no credentials for uri, retrying against configured registry");
            return resolve(registry, config, ResolveOptions { force_auth: None, ..opts });
        }

        if Some(registry) != default_registry {
            let found = find_auth_key(registry, config)?;
            let (scope_key, auth_key) = match found {
                Some((k, a)) => (Some(k), Some(a)),
                None => (None, None),
            };
            return Ok(Credential {
                reg_key: scope_key.clone(),
                auth_key,
                scope_auth_key: scope_key,
                material: AuthMaterial::None,
            });
        }
    }

    debug!(uri, "no credentials configured, using anonymous access");
    Ok(Credential::anonymous())
}

/// First registry key (longest first) whose settings carry auth.
fn find_auth_key(uri: &str, lookup: &FlatConfig) -> PublishResult<Option<(RegistryKey, AuthKey)>> {
    for key in RegistryKey::candidates(uri)? {
        if let Some(auth_key) = has_auth(&key, lookup) {
            return Ok(Some((key, auth_key)));
        }
    }
    Ok(None)
}

fn has_auth(key: &RegistryKey, lookup: &FlatConfig) -> Option<AuthKey> {
    let k = key.as_str();
    if lookup.get_scoped(k, "_authToken").is_some() {
        return Some(AuthKey::AuthToken);
    }
    if lookup.get_scoped(k, "_auth").is_some() {
        return Some(AuthKey::Auth);
    }
    if lookup.get_scoped(k, "username").is_some() && lookup.get_scoped(k, "_password").is_some() {
        return Some(AuthKey::Username);
    }
    if lookup.get_scoped(k, "certfile").is_some() && lookup.get_scoped(k, "keyfile").is_some() {
        return Some(AuthKey::CertFile);
    }
    None
}

fn credential_from_override(force: &ForceAuth) -> PublishResult<Credential> {
    let fields = RawFields {
        token: force.raw_token(),
        auth: force.raw_auth(),
        username: force.raw_username(),
        password: force.raw_password(),
        certfile: force.raw_certfile(),
        keyfile: force.raw_keyfile(),
    };
    let material = fields.into_material()?;

    if material == AuthMaterial::None {
        return Err(PublishError::AuthResolution {
            message: "forced auth override has no usable token, username/password or certificate"
                .to_string(),
        });
    }

    Ok(Credential {
        material,
        ..Credential::default()
    })
}

/// Auth-related fields as found in a mapping.
struct RawFields<'a> {
    token: Option<&'a str>,
    auth: Option<&'a str>,
    username: Option<&'a str>,
    password: Option<&'a str>,
    certfile: Option<&'a str>,
    keyfile: Option<&'a str>,
}

impl<'a> RawFields<'a> {
    fn at(lookup: &'a FlatConfig, key: &RegistryKey) -> Self {
        let k = key.as_str();
        Self {
            token: lookup.get_scoped(k, "_authToken"),
            auth: lookup.get_scoped(k, "_auth"),
            username: lookup.get_scoped(k, "username"),
            password: lookup.get_scoped(k, "_password"),
            certfile: lookup.get_scoped(k, "certfile"),
            keyfile: lookup.get_scoped(k, "keyfile"),
        }
    }

    /// Priority: token, pre-built auth, username/password, client cert.
    fn into_material(self) -> PublishResult<AuthMaterial> {
        if let Some(token) = self.token {
            return Ok(AuthMaterial::Token(token.to_string()));
        }
        if let Some(auth) = self.auth {
            return Ok(AuthMaterial::Basic(auth.to_string()));
        }
        if let (Some(username), Some(password)) = (self.username, self.password) {
            return Ok(AuthMaterial::Basic(basic_auth(username, password)?));
        }
        if let (Some(certfile), Some(keyfile)) = (self.certfile, self.keyfile) {
            if let (Some(cert), Some(key)) = (maybe_read_file(certfile)?, maybe_read_file(keyfile)?) {
                return Ok(AuthMaterial::ClientCert { cert, key });
            }
        }
        Ok(AuthMaterial::None)
    }
}

/// Standard alphabet, padding optional (`_password` is often stored unpadded).
const PASSWORD_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// `base64(username ":" base64decode(password))`.
fn basic_auth(username: &str, password_b64: &str) -> PublishResult<String> {
    let decoded = PASSWORD_BASE64
        .decode(password_b64.trim())
        .map_err(|e| PublishError::Config {
            message: format!("`_password` must be base64 encoded: {e}"),
        })?;
    let password = String::from_utf8_lossy(&decoded);
    Ok(BASE64.encode(format!("{username}:{password}")))
}

/// Read a PEM file; a missing file counts as absent.
fn maybe_read_file(path: &str) -> PublishResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path, "certificate file not found, ignoring");
            Ok(None)
        }
        Err(e) => Err(PublishError::Config {
            message: format!("failed to read {path}: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_opts() -> ResolveOptions<'static> {
        ResolveOptions::default()
    }

    #[test]
    fn test_host_root_token() {
        let config = FlatConfig::new().with("//registry.example.com/:_authToken", "abc");
        let cred = resolve("https://registry.example.com/pkg", &config, no_opts()).unwrap();

        assert_eq!(cred.material, AuthMaterial::Token("abc".into()));
        assert_eq!(cred.reg_key.unwrap().as_str(), "//registry.example.com/");
        assert_eq!(cred.auth_key, Some(AuthKey::AuthToken));
    }

    #[test]
    fn test_same_credential_at_any_depth() {
        let config = FlatConfig::new().with("//r.example/:_authToken", "root");
        let shallow = resolve("https://r.example/", &config, no_opts()).unwrap();
        let deep = resolve("https://r.example/a/b/c/d", &config, no_opts()).unwrap();
        assert_eq!(shallow, deep);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let config = FlatConfig::new()
            .with("//r.example/:_authToken", "root")
            .with("//r.example/team/:_authToken", "team");
        let cred = resolve("https://r.example/team/pkg", &config, no_opts()).unwrap();
        assert_eq!(cred.material, AuthMaterial::Token("team".into()));
    }

    #[test]
    fn test_token_beats_basic_at_same_key() {
        let config = FlatConfig::new()
            .with("//r.example/:username", "alice")
            .with("//r.example/:_password", BASE64.encode("secret"))
            .with("//r.example/:_authToken", "tok");
        let cred = resolve("https://r.example/", &config, no_opts()).unwrap();
        assert_eq!(cred.auth_key, Some(AuthKey::AuthToken));
        assert_eq!(cred.authorization_header().unwrap(), "Bearer tok");
    }

    #[test]
    fn test_username_password_basic() {
        let config = FlatConfig::new()
            .with("//r.example/:username", "alice")
            .with("//r.example/:_password", BASE64.encode("s3cret"));
        let cred = resolve("https://r.example/pkg", &config, no_opts()).unwrap();

        assert!(cred.is_basic_auth());
        assert_eq!(cred.auth_key, Some(AuthKey::Username));
        let expected = BASE64.encode("alice:s3cret");
        assert_eq!(cred.authorization_header().unwrap(), format!("Basic {expected}"));
    }

    #[test]
    fn test_unpadded_password() {
        // "s3cre" encodes to "czNjcmU=".
        let config = FlatConfig::new()
            .with("//r.example/:username", "alice")
            .with("//r.example/:_password", "czNjcmU");
        let cred = resolve("https://r.example/", &config, no_opts()).unwrap();

        let expected = BASE64.encode("alice:s3cre");
        assert_eq!(cred.authorization_header().unwrap(), format!("Basic {expected}"));
    }

    #[test]
    fn test_username_without_password_is_not_auth() {
        let config = FlatConfig::new().with("//r.example/:username", "alice");
        let cred = resolve("https://r.example/", &config, no_opts()).unwrap();
        assert!(cred.is_anonymous());
    }

    #[test]
    fn test_prebuilt_auth() {
        let config = FlatConfig::new().with("//r.example/:_auth", "dXNlcjpwYXNz");
        let cred = resolve("https://r.example/", &config, no_opts()).unwrap();
        assert_eq!(cred.authorization_header().unwrap(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_no_match_is_anonymous() {
        let config = FlatConfig::new().with("//other.example/:_authToken", "x");
        let cred = resolve("https://r.example/pkg", &config, no_opts()).unwrap();
        assert!(cred.is_anonymous());
        assert!(cred.authorization_header().is_none());
    }

    #[test]
    fn test_fallback_to_registry_on_same_host() {
        let config = FlatConfig::new()
            .with("registry", "https://r.example/npm/")
            .with("//r.example/npm/:_authToken", "npm-token");
        let cred = resolve("https://r.example/tarballs/x.tgz", &config, no_opts()).unwrap();
        assert_eq!(cred.material, AuthMaterial::Token("npm-token".into()));
    }

    #[test]
    fn test_scope_registry_records_key_only() {
        let config = FlatConfig::new()
            .with("registry", "https://public.example/")
            .with("@acme:registry", "https://acme.example/")
            .with("//acme.example/:_authToken", "acme");
        let opts = ResolveOptions {
            scope: Some("@acme"),
            ..ResolveOptions::default()
        };
        let cred = resolve("https://elsewhere.example/", &config, opts).unwrap();
        assert!(cred.is_anonymous());
        assert_eq!(cred.scope_auth_key.unwrap().as_str(), "//acme.example/");
    }

    #[test]
    fn test_force_auth_raw_fields() {
        let config = FlatConfig::new().with("//r.example/:_authToken", "from-config");
        let force = ForceAuth::token("forced");
        let opts = ResolveOptions {
            force_auth: Some(&force),
            ..ResolveOptions::default()
        };
        let cred = resolve("https://r.example/", &config, opts).unwrap();
        assert_eq!(cred.material, AuthMaterial::Token("forced".into()));
        assert!(cred.reg_key.is_none());
    }

    #[test]
    fn test_force_auth_basic_never_empty() {
        let force = ForceAuth::basic("bob", BASE64.encode("pw"));
        let opts = ResolveOptions {
            force_auth: Some(&force),
            ..ResolveOptions::default()
        };
        let cred = resolve("https://r.example/", &FlatConfig::new(), opts).unwrap();
        assert!(!cred.is_anonymous());
        assert!(cred.is_basic_auth());
    }

    #[test]
    fn test_force_auth_composite_key() {
        let force = ForceAuth::new(FlatConfig::new().with("//r.example/:_authToken", "scoped"));
        let opts = ResolveOptions {
            force_auth: Some(&force),
            ..ResolveOptions::default()
        };
        let cred = resolve("https://r.example/pkg", &FlatConfig::new(), opts).unwrap();
        assert_eq!(cred.material, AuthMaterial::Token("scoped".into()));
        assert_eq!(cred.reg_key.unwrap().as_str(), "//r.example/");
    }

    #[test]
    fn test_force_auth_unsatisfiable() {
        let force = ForceAuth::new(FlatConfig::new().with("username", "only-user"));
        let opts = ResolveOptions {
            force_auth: Some(&force),
            ..ResolveOptions::default()
        };
        let err = resolve("https://r.example/", &FlatConfig::new(), opts).unwrap_err();
        assert!(matches!(err, PublishError::AuthResolution { .. }));
    }

    #[test]
    fn test_client_cert_files() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::File::create(&cert_path)
            .unwrap()
            .write_all(b"CERT")
            .unwrap();
        std::fs::File::create(&key_path)
            .unwrap()
            .write_all(b"KEY")
            .unwrap();

        let config = FlatConfig::new()
            .with("//r.example/:certfile", cert_path.to_string_lossy())
            .with("//r.example/:keyfile", key_path.to_string_lossy());
        let cred = resolve("https://r.example/", &config, no_opts()).unwrap();
        assert_eq!(
            cred.material,
            AuthMaterial::ClientCert {
                cert: "CERT".into(),
                key: "KEY".into()
            }
        );
        assert!(cred.authorization_header().is_none());
    }

    #[test]
    fn test_missing_cert_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let config = FlatConfig::new()
            .with("//r.example/:certfile", dir.path().join("nope.pem").to_string_lossy())
            .with("//r.example/:keyfile", dir.path().join("nope.key").to_string_lossy());
        let cred = resolve("https://r.example/", &config, no_opts()).unwrap();
        assert_eq!(cred.auth_key, Some(AuthKey::CertFile));
        assert!(cred.is_anonymous());
    }

    #[test]
    fn test_unreadable_cert_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file.
        let config = FlatConfig::new()
            .with("//r.example/:certfile", dir.path().to_string_lossy())
            .with("//r.example/:keyfile", dir.path().to_string_lossy());
        let result = resolve("https://r.example/", &config, no_opts());
        assert!(matches!(result, Err(PublishError::Config { .. })));
    }
}
