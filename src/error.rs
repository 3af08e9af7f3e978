// Error handling module
// Defines the normalized FHIR error type

use thiserror::Error;

use crate::http_client::NetworkErrorKind;

/// Errors produced while talking to Aidbox or dispatching tools.
///
/// `Display` is the human-readable message handed to MCP clients, so
/// upstream and network variants render their message verbatim.
#[derive(Error, Debug)]
pub enum FhirError {
    /// Token exchange against `/auth/token` failed
    #[error("OAuth2 authentication failed")]
    OAuth2(String),

    /// Aidbox answered with a non-2xx status
    #[error("{message}")]
    Upstream { status: u16, message: String },

    /// No response was received (refused, reset, timeout, DNS)
    #[error("{message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// Connectivity probe failed
    #[error("{0}")]
    Connection(String),

    /// Tool arguments or request payload were rejected before any I/O
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Tool name not registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl FhirError {
    /// Upstream HTTP status, when the failure came from an actual response
    pub fn status(&self) -> Option<u16> {
        match self {
            FhirError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short machine-readable kind used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            FhirError::OAuth2(_) => "oauth2_error",
            FhirError::Upstream { .. } => "upstream_error",
            FhirError::Network { .. } => "network_error",
            FhirError::Connection(_) => "connection_error",
            FhirError::InvalidArguments(_) => "invalid_arguments",
            FhirError::UnknownTool(_) => "unknown_tool",
            FhirError::Config(_) => "config_error",
            FhirError::Internal(_) => "internal_error",
        }
    }
}

/// Result type alias for FHIR operations
pub type Result<T> = std::result::Result<T, FhirError>;
