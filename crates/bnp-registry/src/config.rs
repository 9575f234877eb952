//! Publish configuration.
//!
//! The registry ecosystem stores settings as a flat `key -> value` mapping
//! where per-registry settings use `{registryKey}:{field}` composite keys
//! (`//registry.example.com/:_authToken`). [`FlatConfig`] holds that mapping
//! verbatim and [`PublishOptions`] is the typed view of the top-level keys.
//!
//! | Key | Description |
//! |-----|-------------|
//! | `registry` | Default registry URL (default: `https://registry.npmjs.org/`) |
//! | `@scope:registry` | Registry for a scope |
//! | `timeout` | Request timeout in milliseconds (default: 30000) |
//! | `retry` | Retries for transient failures (default: 0) |
//! | `access` | `public` or `restricted` |
//! | `tag` | Dist-tag to publish under (default: `latest`) |
//! | `provenance` | Generate provenance in CI |
//! | `provenanceFile` | Attach a pre-built provenance bundle |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PublishError, PublishResult};

/// Public registry used when nothing else is configured.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Immutable flat configuration mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlatConfig {
    values: BTreeMap<String, String>,
}

impl FlatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key (builder style).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Raw lookup. Empty values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Lookup of a `{registryKey}:{field}` composite key.
    pub fn get_scoped(&self, prefix: &str, field: &str) -> Option<&str> {
        self.get(&format!("{prefix}:{field}"))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn get_bool(&self, key: &str) -> PublishResult<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) if v == "true" || v == "1" => Ok(Some(true)),
            Some(v) if v == "false" || v == "0" => Ok(Some(false)),
            Some(v) => Err(PublishError::Config {
                message: format!("`{key}` must be a boolean, got `{v}`"),
            }),
        }
    }

    fn get_parsed<T: FromStr>(&self, key: &str) -> PublishResult<Option<T>>
    where
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|v| {
                v.parse::<T>().map_err(|e| PublishError::Config {
                    message: format!("invalid `{key}` value `{v}`: {e}"),
                })
            })
            .transpose()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FlatConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Package access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Public,
    Restricted,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Restricted => "restricted",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Access {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "restricted" => Ok(Self::Restricted),
            other => Err(PublishError::Config {
                message: format!("access must be `public` or `restricted`, got `{other}`"),
            }),
        }
    }
}

/// Typed publish options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Default registry URL.
    #[serde(default = "default_registry")]
    pub registry: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum retries for transient failures.
    #[serde(default)]
    pub retry: u32,

    /// Access level; `None` lets the registry decide.
    #[serde(default)]
    pub access: Option<Access>,

    /// Dist-tag to publish under.
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Generate provenance from the current CI environment.
    #[serde(default)]
    pub provenance: bool,

    /// Attach and verify a pre-built provenance bundle.
    #[serde(default)]
    pub provenance_file: Option<String>,

    /// One-time password for 2FA-protected accounts.
    #[serde(default)]
    pub otp: Option<String>,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Value of the `npm-auth-type` header.
    #[serde(default = "default_auth_type")]
    pub auth_type: String,

    /// Default scope (`@scope`).
    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default)]
    pub npm_session: Option<String>,

    #[serde(default)]
    pub npm_command: Option<String>,
}

fn default_registry() -> String {
    DEFAULT_REGISTRY.to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_tag() -> String {
    "latest".to_string()
}

fn default_user_agent() -> String {
    crate::REGISTRY_USER_AGENT.to_string()
}

fn default_auth_type() -> String {
    "web".to_string()
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            timeout_ms: default_timeout_ms(),
            retry: 0,
            access: None,
            tag: default_tag(),
            provenance: false,
            provenance_file: None,
            otp: None,
            user_agent: default_user_agent(),
            auth_type: default_auth_type(),
            scope: None,
            npm_session: None,
            npm_command: Some("publish".to_string()),
        }
    }
}

impl PublishOptions {
    /// Read the top-level keys of a flat configuration.
    pub fn from_config(config: &FlatConfig) -> PublishResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            registry: config
                .get("registry")
                .map(String::from)
                .unwrap_or(defaults.registry),
            timeout_ms: config
                .get_parsed("timeout")?
                .unwrap_or(defaults.timeout_ms),
            retry: config.get_parsed("retry")?.unwrap_or(defaults.retry),
            access: config.get_parsed("access")?,
            tag: config
                .get("tag")
                .or_else(|| config.get("defaultTag"))
                .map(String::from)
                .unwrap_or(defaults.tag),
            provenance: config.get_bool("provenance")?.unwrap_or(false),
            provenance_file: config.get("provenanceFile").map(String::from),
            otp: config.get("otp").map(String::from),
            user_agent: config
                .get("userAgent")
                .map(String::from)
                .unwrap_or(defaults.user_agent),
            auth_type: config
                .get("authType")
                .map(String::from)
                .unwrap_or(defaults.auth_type),
            scope: config.get("scope").map(String::from),
            npm_session: config.get("npmSession").map(String::from),
            npm_command: config
                .get("npmCommand")
                .map(String::from)
                .or(defaults.npm_command),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Set the registry URL.
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Set the access level.
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = Some(access);
        self
    }

    /// Enable provenance generation.
    pub fn with_provenance(mut self, provenance: bool) -> Self {
        self.provenance = provenance;
        self
    }

    /// Attach a pre-built provenance bundle.
    pub fn with_provenance_file(mut self, path: impl Into<String>) -> Self {
        self.provenance_file = Some(path.into());
        self
    }

    /// Set the retry budget.
    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Set the timeout in milliseconds.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the dist-tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Set the one-time password.
    pub fn with_otp(mut self, otp: impl Into<String>) -> Self {
        self.otp = Some(otp.into());
        self
    }
}

/// Explicit credential override.
///
/// Composite `{registryKey}:{field}` keys in the override are consulted
/// first; when none match, the bare fields (`_authToken`/`token`, `_auth`/
/// `auth`, `username`, `_password`/`password`, `certfile`, `keyfile`) build
/// the credential directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForceAuth {
    fields: FlatConfig,
}

impl ForceAuth {
    pub fn new(fields: FlatConfig) -> Self {
        Self { fields }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self::new(FlatConfig::new().with("_authToken", token))
    }

    pub fn basic(username: impl Into<String>, password_b64: impl Into<String>) -> Self {
        Self::new(
            FlatConfig::new()
                .with("username", username)
                .with("_password", password_b64),
        )
    }

    pub fn fields(&self) -> &FlatConfig {
        &self.fields
    }

    pub(crate) fn raw_token(&self) -> Option<&str> {
        self.fields
            .get("_authToken")
            .or_else(|| self.fields.get("token"))
    }

    pub(crate) fn raw_auth(&self) -> Option<&str> {
        self.fields.get("_auth").or_else(|| self.fields.get("auth"))
    }

    pub(crate) fn raw_username(&self) -> Option<&str> {
        self.fields.get("username")
    }

    pub(crate) fn raw_password(&self) -> Option<&str> {
        self.fields
            .get("_password")
            .or_else(|| self.fields.get("password"))
    }

    pub(crate) fn raw_certfile(&self) -> Option<&str> {
        self.fields.get("certfile")
    }

    pub(crate) fn raw_keyfile(&self) -> Option<&str> {
        self.fields.get("keyfile")
    }
}
