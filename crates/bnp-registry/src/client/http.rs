//! HTTP layer: headers, status mapping, retry.
//!
//! This is the only place that interprets status codes. client/mod.rs works
//! with `PublishError` values only.

use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use tracing::{debug, warn};

use crate::error::{PublishError, PublishResult};

use super::helpers::{extract_error_message, parse_retry_after, retry_backoff};

/// One logical registry request; retried as a whole.
#[derive(Debug)]
pub(crate) struct RegistryRequest<'a> {
    pub method: Method,
    pub url: String,
    pub body: Option<&'a serde_json::Value>,
    /// Package scope for the `npm-scope` header.
    pub scope: Option<&'a str>,
    /// Message used when the registry gives no error text of its own.
    pub fallback_message: String,
}

/// Per-client header values.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestHeaders {
    pub authorization: Option<String>,
    pub auth_type: String,
    pub otp: Option<String>,
    pub scope: Option<String>,
    pub session: Option<String>,
    pub command: Option<String>,
}

/// HTTP backend (reqwest client, headers, retry budget).
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) headers: RequestHeaders,
    pub(crate) max_retries: u32,
}

impl HttpBackend {
    /// Send with retry on transient failures (`Network`, `RateLimited`).
    ///
    /// Once the budget is spent, a failed HTTP status is reported as
    /// `Registry` carrying the registry's own text (or the fallback).
    pub(crate) async fn send(&self, req: &RegistryRequest<'_>) -> PublishResult<reqwest::Response> {
        let mut retries = 0;

        loop {
            match self.send_once(req).await {
                Ok(response) => return Ok(response),
                Err(failed) if failed.error.is_retryable() && retries < self.max_retries => {
                    retries += 1;
                    let backoff = retry_backoff(&failed.error, retries);

                    warn!(
                        error = %failed.error,
                        retry = retries,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis(),
                        "retrying request"
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(failed) => return Err(failed.into_final()),
            }
        }
    }

    async fn send_once(&self, req: &RegistryRequest<'_>) -> Result<reqwest::Response, FailedAttempt> {
        debug!(method = %req.method, url = %req.url, "registry request");

        let mut request = self
            .client
            .request(req.method.clone(), &req.url)
            .header("npm-auth-type", &self.headers.auth_type);

        if let Some(auth) = &self.headers.authorization {
            request = request.header(AUTHORIZATION, auth);
        }
        if let Some(otp) = &self.headers.otp {
            request = request.header("npm-otp", otp);
        }
        if let Some(scope) = req.scope.or(self.headers.scope.as_deref()) {
            request = request.header("npm-scope", scope);
        }
        if let Some(session) = &self.headers.session {
            request = request.header("npm-session", session);
        }
        if let Some(command) = &self.headers.command {
            request = request.header("npm-command", command);
        }
        if let Some(body) = req.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(FailedAttempt::transport)?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        let registry_message = extract_error_message(&body);

        let code = status.as_u16();
        if code == 404 && registry_message.is_none() {
            return Err(FailedAttempt::from(PublishError::NotFound {
                url: req.url.clone(),
            }));
        }

        let message = registry_message.unwrap_or_else(|| req.fallback_message.clone());
        let error = match code {
            429 => PublishError::RateLimited { retry_after },
            500..=599 => PublishError::Network {
                message: format!("HTTP {code}: {message}"),
            },
            _ => {
                return Err(FailedAttempt::from(PublishError::Registry {
                    status: code,
                    message,
                }))
            }
        };

        Err(FailedAttempt {
            error,
            surfaced: Some(PublishError::Registry {
                status: code,
                message,
            }),
        })
    }
}

/// A failed attempt. `surfaced` is what the caller sees when the attempt is
/// not retried.
struct FailedAttempt {
    error: PublishError,
    surfaced: Option<PublishError>,
}

impl FailedAttempt {
    fn transport(err: reqwest::Error) -> Self {
        Self::from(PublishError::from(err))
    }

    fn into_final(self) -> PublishError {
        self.surfaced.unwrap_or(self.error)
    }
}

impl From<PublishError> for FailedAttempt {
    fn from(error: PublishError) -> Self {
        Self {
            error,
            surfaced: None,
        }
    }
}
