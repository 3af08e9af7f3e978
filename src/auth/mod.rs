// Authentication module
// Basic and OAuth2 client-credentials strategies with a token cache

mod exchange;
mod manager;
mod types;

pub use exchange::{DEFAULT_EXPIRES_IN_SECS, EXPIRY_MARGIN_SECS};
pub use manager::{basic_header, CredentialManager};
pub use types::{AuthConfig, CachedToken};
