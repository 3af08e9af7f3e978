// OAuth2 client-credentials token exchange

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;

use super::types::{CachedToken, TokenResponse};

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Tokens are treated as expired this many seconds early
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Build the token endpoint for a base URL
pub fn token_url(base_url: &str) -> String {
    format!("{}/auth/token", base_url.trim_end_matches('/'))
}

/// Compute the cached expiry for a token issued at `issued_at`.
///
/// Fails when `expires_in` falls outside the representable date range.
pub fn expiry_for(issued_at: DateTime<Utc>, expires_in: Option<i64>) -> Result<DateTime<Utc>> {
    let expires_in = expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
    expires_in
        .checked_sub(EXPIRY_MARGIN_SECS)
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
        .with_context(|| format!("OAuth2 token expires_in out of range: {}", expires_in))
}

/// Exchange client credentials for a bearer token.
///
/// Absent credentials are sent as empty strings and left for the server to reject.
pub async fn request_token(
    client: &Client,
    url: &str,
    client_id: Option<&str>,
    client_secret: Option<&str>,
    now: DateTime<Utc>,
) -> Result<CachedToken> {
    tracing::debug!(url = %url, "Requesting OAuth2 token via client_credentials");

    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id.unwrap_or_default()),
        ("client_secret", client_secret.unwrap_or_default()),
    ];

    let response = client
        .post(url)
        .form(&form)
        .send()
        .await
        .context("Failed to send OAuth2 token request")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            "OAuth2 token request failed: status={}, body={}",
            status,
            error_text
        );

        // Aidbox follows RFC 6749 error bodies
        if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(&error_text) {
            if let Some(error_code) = error_json.get("error").and_then(|v| v.as_str()) {
                tracing::error!(
                    "OAuth2 error details: error={}, description={}",
                    error_code,
                    error_json
                        .get("error_description")
                        .and_then(|v| v.as_str())
                        .unwrap_or("-")
                );
            }
        }

        anyhow::bail!("OAuth2 token request failed: {} - {}", status, error_text);
    }

    let data: TokenResponse = response
        .json()
        .await
        .context("Failed to parse OAuth2 token response")?;

    if data.access_token.is_empty() {
        anyhow::bail!("OAuth2 token response does not contain access_token");
    }

    let expires_at = expiry_for(now, data.expires_in)?;

    tracing::info!("OAuth2 token acquired, expires: {}", expires_at.to_rfc3339());

    Ok(CachedToken {
        access_token: data.access_token,
        expires_at,
    })
}
