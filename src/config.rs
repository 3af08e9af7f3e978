use anyhow::{bail, Context, Result};
use clap::Parser;
use std::time::Duration;

use crate::auth::AuthConfig;
use crate::fhir_client::{FhirClientConfig, PathStyle, ProbeEndpoint};

/// Aidbox MCP Server - FHIR tools over the Model Context Protocol
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Aidbox base URL
    #[arg(long, env = "AIDBOX_URL", default_value = "http://localhost:8888")]
    pub aidbox_url: String,

    /// Authentication mode (basic, oauth2)
    #[arg(long, env = "AIDBOX_AUTH_TYPE", default_value = "basic")]
    pub auth_type: String,

    /// Username for basic authentication
    #[arg(long, env = "AIDBOX_USERNAME")]
    pub username: Option<String>,

    /// Password for basic authentication
    #[arg(long, env = "AIDBOX_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Client id for OAuth2 client credentials
    #[arg(long, env = "AIDBOX_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Client secret for OAuth2 client credentials
    #[arg(long, env = "AIDBOX_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Where resources live (fhir = {base}/fhir/{type}, root = {base}/{type})
    #[arg(long, env = "AIDBOX_PATH_STYLE", default_value = "fhir")]
    pub path_style: String,

    /// Connectivity probe (version = /$version, metadata = /metadata)
    #[arg(long, env = "AIDBOX_PROBE_ENDPOINT", default_value = "version")]
    pub probe_endpoint: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "AIDBOX_REQUEST_TIMEOUT", default_value = "10")]
    pub request_timeout: u64,

    /// Start without probing Aidbox
    #[arg(long, env = "SKIP_AIDBOX_CONNECTION")]
    pub skip_connection: bool,

    /// Serve MCP over HTTP instead of stdio
    #[arg(long, env = "MCP_HTTP_MODE")]
    pub http_mode: bool,

    /// HTTP listen address
    #[arg(short = 'H', long, env = "MCP_HTTP_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP listen port
    #[arg(short, long, env = "MCP_HTTP_PORT", default_value = "3002")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (pretty, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Aidbox connection
    pub aidbox_url: String,
    pub auth: AuthConfig,
    pub path_style: PathStyle,
    pub probe_endpoint: ProbeEndpoint,
    pub request_timeout: u64,
    pub skip_connection: bool,

    // Transport
    pub http_mode: bool,
    pub http_host: String,
    pub http_port: u16,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    /// Build configuration from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let auth = match parse_auth_type(&args.auth_type)? {
            AuthKind::Basic => AuthConfig::Basic {
                username: non_empty(args.username),
                password: non_empty(args.password),
            },
            AuthKind::OAuth2 => AuthConfig::OAuth2 {
                client_id: non_empty(args.client_id),
                client_secret: non_empty(args.client_secret),
            },
        };

        Ok(Config {
            aidbox_url: args.aidbox_url.trim_end_matches('/').to_string(),
            auth,
            path_style: parse_path_style(&args.path_style)?,
            probe_endpoint: parse_probe_endpoint(&args.probe_endpoint)?,
            request_timeout: args.request_timeout,
            skip_connection: args.skip_connection,
            http_mode: args.http_mode,
            http_host: args.host,
            http_port: args.port,
            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),
        })
    }

    /// Validate configuration
    ///
    /// Returns the warnings that should be logged once logging is up.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        let url = reqwest::Url::parse(&self.aidbox_url)
            .with_context(|| format!("AIDBOX_URL is not a valid URL: {}", self.aidbox_url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            bail!("AIDBOX_URL must use http or https: {}", self.aidbox_url);
        }

        if self.request_timeout == 0 {
            bail!("AIDBOX_REQUEST_TIMEOUT must be greater than zero");
        }

        match &self.auth {
            AuthConfig::OAuth2 {
                client_id,
                client_secret,
            } => {
                if client_id.is_none() || client_secret.is_none() {
                    bail!("OAuth2 mode requires AIDBOX_CLIENT_ID and AIDBOX_CLIENT_SECRET");
                }
            }
            AuthConfig::Basic { username, password } => {
                if username.is_none() || password.is_none() {
                    warnings.push(
                        "AIDBOX_USERNAME/AIDBOX_PASSWORD not set; requests will be sent without credentials"
                            .to_string(),
                    );
                }
            }
        }

        Ok(warnings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Client configuration for the FHIR client
    pub fn fhir_client_config(&self) -> FhirClientConfig {
        let mut config = FhirClientConfig::new(self.aidbox_url.clone(), self.auth.clone());
        config.path_style = self.path_style;
        config.probe_endpoint = self.probe_endpoint;
        config.request_timeout = self.request_timeout();
        config
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum AuthKind {
    Basic,
    OAuth2,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Parse authentication mode from string
fn parse_auth_type(s: &str) -> Result<AuthKind> {
    match s.to_lowercase().as_str() {
        "basic" => Ok(AuthKind::Basic),
        "oauth2" => Ok(AuthKind::OAuth2),
        other => bail!("Unsupported AIDBOX_AUTH_TYPE: {} (expected basic or oauth2)", other),
    }
}

/// Parse resource path style from string
fn parse_path_style(s: &str) -> Result<PathStyle> {
    match s.to_lowercase().as_str() {
        "fhir" => Ok(PathStyle::Fhir),
        "root" => Ok(PathStyle::Root),
        other => bail!("Unsupported AIDBOX_PATH_STYLE: {} (expected fhir or root)", other),
    }
}

/// Parse probe endpoint from string
fn parse_probe_endpoint(s: &str) -> Result<ProbeEndpoint> {
    match s.to_lowercase().as_str() {
        "version" | "$version" => Ok(ProbeEndpoint::Version),
        "metadata" => Ok(ProbeEndpoint::Metadata),
        other => bail!(
            "Unsupported AIDBOX_PROBE_ENDPOINT: {} (expected version or metadata)",
            other
        ),
    }
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Pretty, // default
    }
}
