//! Registry key derivation.
//!
//! A registry key is the `//host/path` form of a URI used as the prefix of
//! per-registry configuration keys. Lookups walk from the full path toward
//! the bare host, never the other way round.

use std::fmt;

use url::Url;

use crate::error::{PublishError, PublishResult};

/// Normalized `//host/path` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey(String);

impl RegistryKey {
    /// Derive the full-length key for a URI.
    pub fn from_uri(uri: &str) -> PublishResult<Self> {
        let parsed = parse_uri(uri)?;
        Ok(Self(format!("//{}{}", host_with_port(&parsed), parsed.path())))
    }

    /// All candidate prefixes for a URI, longest first.
    ///
    /// `https://r.example/a/b` yields `//r.example/a/b`, `//r.example/a/`,
    /// `//r.example/a`, `//r.example/`, `//r.example`.
    pub fn candidates(uri: &str) -> PublishResult<Vec<Self>> {
        let full = Self::from_uri(uri)?;
        let mut out = Vec::new();
        let mut current = full.0.as_str();

        while current.len() > "//".len() {
            out.push(Self(current.to_string()));
            current = shorten(current);
        }

        Ok(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip either one trailing slash or the trailing path segment.
fn shorten(key: &str) -> &str {
    if let Some(stripped) = key.strip_suffix('/') {
        return stripped;
    }
    match key.rfind('/') {
        Some(idx) => &key[..=idx],
        None => "",
    }
}

fn parse_uri(uri: &str) -> PublishResult<Url> {
    Url::parse(uri).map_err(|e| PublishError::Config {
        message: format!("invalid registry URL `{uri}`: {e}"),
    })
}

fn host_with_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Whether two URIs point at the same `host[:port]`.
pub(crate) fn same_host(a: &str, b: &str) -> PublishResult<bool> {
    Ok(host_with_port(&parse_uri(a)?) == host_with_port(&parse_uri(b)?))
}
