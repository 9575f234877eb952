//! Registry client for publishing packages.
//!
//! Public API works on `PublishError` values. All HTTP/status mapping in http.rs.

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use crate::auth::{AuthMaterial, Credential};
use crate::config::PublishOptions;
use crate::error::{PublishError, PublishResult};
use crate::package::PackageSpec;

mod helpers;
mod http;

use helpers::join_url;
use http::{HttpBackend, RegistryRequest, RequestHeaders};

/// Visibility of a package as reported by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Visibility {
    #[serde(default)]
    pub public: bool,
}

/// Client bound to one registry and one resolved credential.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: HttpBackend,
}

impl RegistryClient {
    pub fn new(
        registry_url: &str,
        opts: &PublishOptions,
        credential: &Credential,
    ) -> PublishResult<Self> {
        let mut default_headers = HeaderMap::new();
        let user_agent =
            HeaderValue::from_str(&opts.user_agent).map_err(|e| PublishError::Config {
                message: format!("invalid user agent: {e}"),
            })?;
        default_headers.insert(USER_AGENT, user_agent);

        let mut builder = reqwest::Client::builder()
            .timeout(opts.timeout())
            .default_headers(default_headers);

        if let AuthMaterial::ClientCert { cert, key } = &credential.material {
            let pem = format!("{cert}\n{key}");
            let identity =
                reqwest::Identity::from_pem(pem.as_bytes()).map_err(|e| PublishError::Config {
                    message: format!("invalid client certificate: {e}"),
                })?;
            builder = builder.identity(identity);
        }

        let client = builder.build().map_err(|e| PublishError::Network {
            message: format!("failed to create HTTP client: {}", e),
        })?;

        Ok(Self {
            http: HttpBackend {
                client,
                base_url: registry_url.trim_end_matches('/').to_string(),
                headers: RequestHeaders {
                    authorization: credential.authorization_header(),
                    auth_type: opts.auth_type.clone(),
                    otp: opts.otp.clone(),
                    scope: opts.scope.clone(),
                    session: opts.npm_session.clone(),
                    command: opts.npm_command.clone(),
                },
                max_retries: opts.retry,
            },
        })
    }

    /// Whether the package is already public.
    ///
    /// A 404 means the package is new or private.
    pub async fn package_visibility(&self, spec: &PackageSpec) -> PublishResult<Visibility> {
        let url = self.visibility_url(spec);
        debug!(url = %url, "checking package visibility");

        let request = RegistryRequest {
            method: Method::GET,
            url,
            body: None,
            scope: spec.scope(),
            fallback_message: format!("Failed to check visibility of `{}`", spec.name()),
        };

        let response = match self.http.send(&request).await {
            Ok(response) => response,
            Err(PublishError::NotFound { .. }) | Err(PublishError::Registry { status: 404, .. }) => {
                debug!(package = %spec.name(), "package not found, treating as private");
                return Ok(Visibility::default());
            }
            Err(e) => return Err(e),
        };

        response
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse {
                message: format!("failed to parse visibility response: {}", e),
            })
    }

    /// Write the publish document. Issued once; transient failures are
    /// retried within the configured budget.
    pub async fn put_package(
        &self,
        spec: &PackageSpec,
        document: &serde_json::Value,
    ) -> PublishResult<()> {
        let url = self.package_url(spec);
        debug!(url = %url, package = %spec, "publishing package");

        let request = RegistryRequest {
            method: Method::PUT,
            url,
            body: Some(document),
            scope: spec.scope(),
            fallback_message: format!("Failed to publish: `{spec}`"),
        };

        let result = self.http.send(&request).await;
        match result {
            Ok(_) => Ok(()),
            Err(PublishError::NotFound { .. }) => Err(PublishError::Registry {
                status: 404,
                message: request.fallback_message,
            }),
            Err(e) => Err(e),
        }
    }

    fn package_url(&self, spec: &PackageSpec) -> String {
        join_url(&self.http.base_url, &spec.escaped_name())
    }

    fn visibility_url(&self, spec: &PackageSpec) -> String {
        join_url(
            &self.http.base_url,
            &format!("-/package/{}/visibility", spec.escaped_name()),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.http.base_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.http.headers.authorization.is_some()
    }
}
