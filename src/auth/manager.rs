use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::exchange;
use super::types::{AuthConfig, CachedToken};
use crate::error::{FhirError, Result};

/// Credential manager
/// Produces the Authorization header for each outbound request and owns the OAuth2 token cache
pub struct CredentialManager {
    /// Authentication strategy (immutable after construction)
    config: AuthConfig,

    /// Token endpoint, derived from the Aidbox base URL
    token_url: String,

    /// Cached bearer token (OAuth2 only), replaced wholesale
    token: Arc<RwLock<Option<CachedToken>>>,

    /// HTTP client for token requests
    client: Client,
}

impl CredentialManager {
    /// Create a new CredentialManager for an Aidbox base URL
    pub fn new(config: AuthConfig, base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for token requests")?;

        Ok(Self {
            config,
            token_url: exchange::token_url(base_url),
            token: Arc::new(RwLock::new(None)),
            client,
        })
    }

    /// Whether 401 responses should trigger a token refresh and retry
    pub fn is_oauth2(&self) -> bool {
        matches!(self.config, AuthConfig::OAuth2 { .. })
    }

    /// Authorization header value for the next request, if any
    pub async fn authorization(&self) -> Result<Option<String>> {
        self.authorization_at(Utc::now()).await
    }

    pub(crate) async fn authorization_at(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        match &self.config {
            AuthConfig::Basic { username, password } => Ok(basic_header(
                username.as_deref(),
                password.as_deref(),
            )),
            AuthConfig::OAuth2 { .. } => {
                let token = self.access_token_at(now).await?;
                Ok(Some(format!("Bearer {}", token)))
            }
        }
    }

    /// Get a valid bearer token, acquiring a new one when the cache is empty or expired.
    ///
    /// The cache lock is not held across the exchange, so concurrent callers that all
    /// observe an expired token may each acquire one; the last writer wins.
    async fn access_token_at(&self, now: DateTime<Utc>) -> Result<String> {
        {
            let token = self.token.read().await;
            if let Some(ref cached) = *token {
                if cached.is_valid_at(now) {
                    return Ok(cached.access_token.clone());
                }
                tracing::debug!(
                    expired_at = %cached.expires_at.to_rfc3339(),
                    "Cached OAuth2 token expired"
                );
            }
        }

        let (client_id, client_secret) = match &self.config {
            AuthConfig::OAuth2 {
                client_id,
                client_secret,
            } => (client_id.as_deref(), client_secret.as_deref()),
            AuthConfig::Basic { .. } => {
                return Err(FhirError::Config(
                    "Bearer tokens require oauth2 authentication".to_string(),
                ))
            }
        };

        let fresh = exchange::request_token(
            &self.client,
            &self.token_url,
            client_id,
            client_secret,
            now,
        )
        .await
        .map_err(|e| {
            tracing::error!("OAuth2 authentication failed: {:#}", e);
            FhirError::OAuth2(format!("{:#}", e))
        })?;

        let access_token = fresh.access_token.clone();
        *self.token.write().await = Some(fresh);

        Ok(access_token)
    }

    /// Drop the cached token so the next call re-acquires one
    pub async fn invalidate(&self) {
        let mut token = self.token.write().await;
        if token.take().is_some() {
            tracing::debug!("OAuth2 token invalidated");
        }
    }

    /// Authentication strategy in use
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[cfg(test)]
    async fn cached(&self) -> Option<CachedToken> {
        self.token.read().await.clone()
    }
}

/// `Basic base64(username:password)`, only when both parts are present
pub fn basic_header(username: Option<&str>, password: Option<&str>) -> Option<String> {
    match (username, password) {
        (Some(user), Some(pass)) => {
            Some(format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass))))
        }
        _ => None,
    }
}
