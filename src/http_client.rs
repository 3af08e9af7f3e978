use anyhow::Context;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Request, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::CredentialManager;
use crate::error::{FhirError, Result};

/// Fallback message when a transport failure carries no text
const NETWORK_ERROR: &str = "Network error";

/// Classification of transport-level failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    Decode,
    Unknown,
}

impl NetworkErrorKind {
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            NetworkErrorKind::Timeout
        } else if e.is_connect() {
            NetworkErrorKind::Connect
        } else if e.is_request() {
            NetworkErrorKind::Request
        } else if e.is_body() {
            NetworkErrorKind::Body
        } else if e.is_decode() {
            NetworkErrorKind::Decode
        } else {
            NetworkErrorKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkErrorKind::Timeout => "timeout",
            NetworkErrorKind::Connect => "connection_failed",
            NetworkErrorKind::Request => "request_error",
            NetworkErrorKind::Body => "body_error",
            NetworkErrorKind::Decode => "decode_error",
            NetworkErrorKind::Unknown => "unknown",
        }
    }
}

/// HTTP client for Aidbox with credential injection and 401 recovery
pub struct AidboxHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Credential manager
    credentials: Arc<CredentialManager>,
}

impl AidboxHttpClient {
    /// Create a new HTTP client
    pub fn new(credentials: Arc<CredentialManager>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            credentials,
        })
    }

    /// Execute a request, retrying once with a fresh token when an OAuth2
    /// request is rejected with 401. Nothing else is retried.
    pub async fn request_with_retry(&self, request: Request) -> Result<Response> {
        self.request_internal(request, true).await
    }

    /// Execute a request exactly once (connectivity probe)
    pub async fn request_no_retry(&self, request: Request) -> Result<Response> {
        self.request_internal(request, false).await
    }

    async fn request_internal(&self, request: Request, enable_retry: bool) -> Result<Response> {
        let retry_on_401 = enable_retry && self.credentials.is_oauth2();
        let mut attempt: u32 = 0;

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(method = %method, url = %url, "Sending Aidbox request");

        loop {
            let mut req = request.try_clone().ok_or_else(|| {
                FhirError::Internal(anyhow::anyhow!("Request body is not cloneable"))
            })?;
            self.apply_authorization(&mut req).await?;

            tracing::debug!(attempt = attempt + 1, "Executing request attempt");

            match self.client.execute(req).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        tracing::debug!(status = %status, "Request successful");
                        return Ok(response);
                    }

                    if status == StatusCode::UNAUTHORIZED && retry_on_401 && attempt == 0 {
                        tracing::warn!(url = %url, "Received 401, refreshing OAuth2 token and retrying");
                        self.credentials.invalidate().await;
                        attempt += 1;
                        continue;
                    }

                    let body = response.bytes().await.ok();
                    let parsed = body
                        .as_deref()
                        .and_then(|b| serde_json::from_slice::<Value>(b).ok());
                    let message = extract_error_message(status, parsed.as_ref());

                    // Probe failures are classified and logged by the caller
                    if enable_retry {
                        tracing::error!(
                            status = status.as_u16(),
                            method = %method,
                            url = %url,
                            attempt = attempt + 1,
                            message = %message,
                            "Aidbox request failed with error response"
                        );
                    } else {
                        tracing::debug!(
                            status = status.as_u16(),
                            url = %url,
                            message = %message,
                            "Aidbox request failed with error response"
                        );
                    }

                    return Err(FhirError::Upstream {
                        status: status.as_u16(),
                        message,
                    });
                }

                Err(e) => {
                    let kind = NetworkErrorKind::from_reqwest(&e);
                    if enable_retry {
                        tracing::error!(
                            error_kind = kind.as_str(),
                            error = %e,
                            error_debug = ?e,
                            url = %url,
                            attempt = attempt + 1,
                            "Aidbox request error"
                        );
                    } else {
                        tracing::debug!(
                            error_kind = kind.as_str(),
                            error = %e,
                            url = %url,
                            "Aidbox request error"
                        );
                    }

                    return Err(network_error(kind, &e.to_string()));
                }
            }
        }
    }

    /// Attach the current Authorization header, replacing any previous one
    async fn apply_authorization(&self, request: &mut Request) -> Result<()> {
        match self.credentials.authorization().await? {
            Some(value) => {
                let mut header = HeaderValue::from_str(&value).map_err(|e| {
                    FhirError::Internal(anyhow::anyhow!("Invalid Authorization header: {}", e))
                })?;
                header.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, header);
            }
            None => {
                request.headers_mut().remove(AUTHORIZATION);
            }
        }
        Ok(())
    }

    /// Credential manager backing this client
    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Parse a successful response body; an empty body becomes `null`
pub async fn read_json(response: Response) -> Result<Value> {
    let bytes = response.bytes().await.map_err(|e| {
        let kind = NetworkErrorKind::from_reqwest(&e);
        network_error(kind, &e.to_string())
    })?;

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    serde_json::from_slice(&bytes).map_err(|e| FhirError::Network {
        kind: NetworkErrorKind::Decode,
        message: format!("Invalid JSON in Aidbox response: {}", e),
    })
}

fn network_error(kind: NetworkErrorKind, message: &str) -> FhirError {
    let message = if message.is_empty() {
        NETWORK_ERROR.to_string()
    } else {
        message.to_string()
    };
    FhirError::Network { kind, message }
}

/// Pick the most specific human-readable message from an error response.
///
/// Precedence: `issue[0].diagnostics` (OperationOutcome), `error.message`,
/// `message`, then `HTTP {status}: {reason}`. Empty strings are skipped.
pub fn extract_error_message(status: StatusCode, body: Option<&Value>) -> String {
    fn non_empty(value: Option<&Value>) -> Option<&str> {
        value.and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    body.and_then(|b| {
        non_empty(b.pointer("/issue/0/diagnostics"))
            .or_else(|| non_empty(b.pointer("/error/message")))
            .or_else(|| non_empty(b.get("message")))
    })
    .map(str::to_string)
    .unwrap_or_else(|| {
        format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status")
        )
    })
}
