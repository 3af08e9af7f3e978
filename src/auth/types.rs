// Authentication types

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Authentication strategy for outbound Aidbox requests
#[derive(Clone, PartialEq, Eq)]
pub enum AuthConfig {
    /// HTTP Basic auth. The header is only sent when both parts are present.
    Basic {
        username: Option<String>,
        password: Option<String>,
    },

    /// OAuth2 client-credentials grant against `{base_url}/auth/token`
    OAuth2 {
        client_id: Option<String>,
        client_secret: Option<String>,
    },
}

impl AuthConfig {
    /// Human-readable strategy name for banners and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AuthConfig::Basic { .. } => "basic",
            AuthConfig::OAuth2 { .. } => "oauth2",
        }
    }
}

// Secrets must never reach log output
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthConfig::Basic { username, password } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &password.as_ref().map(|_| "***"))
                .finish(),
            AuthConfig::OAuth2 {
                client_id,
                client_secret,
            } => f
                .debug_struct("OAuth2")
                .field("client_id", client_id)
                .field("client_secret", &client_secret.as_ref().map(|_| "***"))
                .finish(),
        }
    }
}

/// Bearer token together with its (already margin-adjusted) expiry
#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// A token is usable strictly before `expires_at`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token endpoint response
#[derive(Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    pub expires_in: Option<i64>,
}
