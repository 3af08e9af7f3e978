// Aidbox FHIR client
// Resource operations, connectivity probe and connection state

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::auth::{AuthConfig, CredentialManager};
use crate::error::{FhirError, Result};
use crate::http_client::{read_json, AidboxHttpClient, NetworkErrorKind};

/// Media type for FHIR JSON payloads
pub const FHIR_JSON: &str = "application/fhir+json";

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where FHIR resources live relative to the base URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathStyle {
    /// `{base}/{ResourceType}`
    Root,
    /// `{base}/fhir/{ResourceType}`
    #[default]
    Fhir,
}

impl PathStyle {
    fn prefix(&self) -> Option<&'static str> {
        match self {
            PathStyle::Root => None,
            PathStyle::Fhir => Some("fhir"),
        }
    }
}

/// Endpoint used by the connectivity probe, always relative to the base URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeEndpoint {
    /// `GET {base}/$version`
    #[default]
    Version,
    /// `GET {base}/metadata`
    Metadata,
}

impl ProbeEndpoint {
    fn segment(&self) -> &'static str {
        match self {
            ProbeEndpoint::Version => "$version",
            ProbeEndpoint::Metadata => "metadata",
        }
    }
}

/// Result of the most recent connectivity probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

/// Immutable client configuration
#[derive(Debug, Clone)]
pub struct FhirClientConfig {
    pub base_url: String,
    pub auth: AuthConfig,
    pub path_style: PathStyle,
    pub probe_endpoint: ProbeEndpoint,
    pub request_timeout: Duration,
}

impl FhirClientConfig {
    pub fn new(base_url: impl Into<String>, auth: AuthConfig) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            path_style: PathStyle::default(),
            probe_endpoint: ProbeEndpoint::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// FHIR client for a single Aidbox instance
pub struct FhirClient {
    config: FhirClientConfig,
    http: AidboxHttpClient,
    state: RwLock<ConnectionState>,
}

impl FhirClient {
    pub fn new(config: FhirClientConfig) -> anyhow::Result<Self> {
        let credentials = Arc::new(CredentialManager::new(
            config.auth.clone(),
            &config.base_url,
            config.request_timeout,
        )?);
        let http = AidboxHttpClient::new(credentials, config.request_timeout)?;

        Ok(Self {
            config,
            http,
            state: RwLock::new(ConnectionState::Unknown),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn config(&self) -> &FhirClientConfig {
        &self.config
    }

    // ==================================================================================================
    // Resource operations
    // ==================================================================================================

    /// `GET {base}{prefix}/{type}?params` and return the Bundle
    pub async fn search(&self, resource_type: &str, params: &[(String, String)]) -> Result<Value> {
        let url = self.resource_url(resource_type, None)?;
        let request = self.request(Method::GET, url).query(params);
        self.send(request).await
    }

    /// `GET {base}{prefix}/{type}/{id}`
    pub async fn get(&self, resource_type: &str, id: &str) -> Result<Value> {
        let url = self.resource_url(resource_type, Some(id))?;
        self.send(self.request(Method::GET, url)).await
    }

    /// `POST {base}{prefix}/{type}`
    pub async fn create(&self, resource_type: &str, resource: &Value) -> Result<Value> {
        let url = self.resource_url(resource_type, None)?;
        let request = self.request(Method::POST, url).body(encode(resource)?);
        self.send(request).await
    }

    /// `PUT {base}{prefix}/{type}/{id}` with the body's `id` forced to `id`
    pub async fn update(&self, resource_type: &str, id: &str, resource: Value) -> Result<Value> {
        let resource = with_resource_id(resource, id)?;
        let url = self.resource_url(resource_type, Some(id))?;
        let request = self.request(Method::PUT, url).body(encode(&resource)?);
        self.send(request).await
    }

    /// `DELETE {base}{prefix}/{type}/{id}`; the response body is discarded
    pub async fn delete(&self, resource_type: &str, id: &str) -> Result<Value> {
        let url = self.resource_url(resource_type, Some(id))?;
        let request = self.build(self.request(Method::DELETE, url))?;
        self.http.request_with_retry(request).await?;
        Ok(json!({ "success": true }))
    }

    // ==================================================================================================
    // Connectivity
    // ==================================================================================================

    /// Probe Aidbox once and record the outcome.
    ///
    /// Only an exact 200 counts as connected. Failures are classified into
    /// connection refused, 401, 403 and everything else.
    pub async fn test_connection(&self) -> Result<()> {
        tracing::info!(url = %self.config.base_url, "Attempting to connect to Aidbox");

        match self.probe().await {
            Ok(body) => {
                *self.state.write().await = ConnectionState::Connected;
                match server_version(&body) {
                    Some(version) => {
                        tracing::info!(version = %version, "Successfully connected to Aidbox")
                    }
                    None => tracing::info!("Successfully connected to Aidbox"),
                }
                Ok(())
            }
            Err(err) => {
                *self.state.write().await = ConnectionState::Disconnected;
                // The caller logs the classified message
                tracing::debug!(error = %err, "Aidbox probe failed");
                Err(FhirError::Connection(probe_failure_message(
                    &self.config.base_url,
                    &err,
                )))
            }
        }
    }

    async fn probe(&self) -> Result<Value> {
        let url = self.probe_url()?;
        let request = self.build(self.request(Method::GET, url))?;
        let response = self.http.request_no_retry(request).await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FhirError::Upstream {
                status: status.as_u16(),
                message: format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown Status")
                ),
            });
        }

        // A 200 with an unreadable body still proves reachability
        Ok(read_json(response).await.unwrap_or(Value::Null))
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Mark the client disconnected and drop any cached token. Idempotent.
    pub async fn disconnect(&self) {
        *self.state.write().await = ConnectionState::Disconnected;
        self.http.credentials().invalidate().await;
        tracing::debug!("Aidbox client disconnected");
    }

    // ==================================================================================================
    // Request plumbing
    // ==================================================================================================

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .client()
            .request(method, url)
            .header(CONTENT_TYPE, FHIR_JSON)
            .header(ACCEPT, FHIR_JSON)
    }

    fn build(&self, builder: RequestBuilder) -> Result<reqwest::Request> {
        builder
            .build()
            .map_err(|e| FhirError::Internal(anyhow::anyhow!("Failed to build request: {}", e)))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value> {
        let request = self.build(builder)?;
        let response = self.http.request_with_retry(request).await?;
        read_json(response).await
    }

    fn base(&self) -> Result<Url> {
        let url = Url::parse(&self.config.base_url).map_err(|e| {
            FhirError::Config(format!("Invalid Aidbox URL {}: {}", self.config.base_url, e))
        })?;
        if url.cannot_be_a_base() {
            return Err(FhirError::Config(format!(
                "Invalid Aidbox URL {}",
                self.config.base_url
            )));
        }
        Ok(url)
    }

    /// `{base}{prefix}/{type}[/{id}]` with each segment percent-encoded
    pub fn resource_url(&self, resource_type: &str, id: Option<&str>) -> Result<Url> {
        let mut url = self.base()?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            if let Some(prefix) = self.config.path_style.prefix() {
                segments.push(prefix);
            }
            segments.push(resource_type);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    pub fn probe_url(&self) -> Result<Url> {
        let mut url = self.base()?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.push(self.config.probe_endpoint.segment());
        }
        Ok(url)
    }
}

/// Return `resource` with its `id` set to `id`; non-object bodies are rejected
pub fn with_resource_id(resource: Value, id: &str) -> Result<Value> {
    match resource {
        Value::Object(mut map) => {
            map.insert("id".to_string(), Value::String(id.to_string()));
            Ok(Value::Object(map))
        }
        other => Err(FhirError::InvalidArguments(format!(
            "resource body must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn encode(resource: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(resource)
        .map_err(|e| FhirError::Internal(anyhow::anyhow!("Failed to encode resource: {}", e)))
}

/// Server version from a `$version` payload or a CapabilityStatement
fn server_version(body: &Value) -> Option<&str> {
    body.get("version")
        .and_then(Value::as_str)
        .or_else(|| body.pointer("/software/version").and_then(Value::as_str))
        .or_else(|| body.get("fhirVersion").and_then(Value::as_str))
}

/// User-facing message for a failed connectivity probe
pub fn probe_failure_message(base_url: &str, err: &FhirError) -> String {
    match err {
        FhirError::Network {
            kind: NetworkErrorKind::Connect,
            ..
        } => format!(
            "Cannot connect to Aidbox at {}. Please ensure Aidbox is running and check the URL.",
            base_url
        ),
        FhirError::Upstream { status: 401, .. } => {
            "Authentication failed. Please check your Aidbox credentials.".to_string()
        }
        FhirError::Upstream { status: 403, .. } => {
            "Access forbidden. Please check your Aidbox permissions.".to_string()
        }
        other => format!("Failed to connect to Aidbox: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn basic_config(base_url: &str) -> FhirClientConfig {
        FhirClientConfig::new(
            base_url,
            AuthConfig::Basic {
                username: Some("root".to_string()),
                password: Some("secret".to_string()),
            },
        )
    }

    fn client(base_url: &str) -> FhirClient {
        FhirClient::new(basic_config(base_url)).unwrap()
    }

    #[test]
    fn test_resource_url_path_styles() {
        let fhir = client("http://localhost:8888/");
        assert_eq!(
            fhir.resource_url("Patient", Some("pt-1")).unwrap().as_str(),
            "http://localhost:8888/fhir/Patient/pt-1"
        );

        let mut config = basic_config("http://localhost:8888");
        config.path_style = PathStyle::Root;
        let root = FhirClient::new(config).unwrap();
        assert_eq!(
            root.resource_url("Observation", None).unwrap().as_str(),
            "http://localhost:8888/Observation"
        );
    }

    #[test]
    fn test_resource_url_encodes_ids() {
        let fhir = client("http://localhost:8888");
        assert_eq!(
            fhir.resource_url("Patient", Some("a/b")).unwrap().as_str(),
            "http://localhost:8888/fhir/Patient/a%2Fb"
        );
    }

    #[test]
    fn test_probe_url_ignores_path_style() {
        let fhir = client("http://localhost:8888");
        assert_eq!(
            fhir.probe_url().unwrap().as_str(),
            "http://localhost:8888/$version"
        );

        let mut config = basic_config("http://localhost:8888");
        config.probe_endpoint = ProbeEndpoint::Metadata;
        let metadata = FhirClient::new(config).unwrap();
        assert_eq!(
            metadata.probe_url().unwrap().as_str(),
            "http://localhost:8888/metadata"
        );
    }

    #[test]
    fn test_with_resource_id_overrides_body_id() {
        let body = json!({"resourceType": "Patient", "id": "other", "active": true});
        let updated = with_resource_id(body, "pt-1").unwrap();
        assert_eq!(updated["id"], "pt-1");
        assert_eq!(updated["active"], true);

        let body = json!({"resourceType": "Patient"});
        assert_eq!(with_resource_id(body, "pt-2").unwrap()["id"], "pt-2");
    }

    #[test]
    fn test_with_resource_id_rejects_non_objects() {
        let err = with_resource_id(json!([1, 2]), "pt-1").unwrap_err();
        assert!(matches!(err, FhirError::InvalidArguments(_)));
    }

    proptest! {
        #[test]
        fn prop_update_body_id_matches_argument(id in "[A-Za-z0-9.-]{1,64}", prior in proptest::option::of("[a-z]{1,10}")) {
            let mut body = json!({"resourceType": "Patient"});
            if let Some(prior) = prior {
                body["id"] = Value::String(prior);
            }
            let updated = with_resource_id(body, &id).unwrap();
            prop_assert_eq!(updated["id"].as_str(), Some(id.as_str()));
        }
    }

    #[test]
    fn test_probe_failure_messages() {
        let base = "http://localhost:8888";

        let refused = FhirError::Network {
            kind: NetworkErrorKind::Connect,
            message: "connection refused".to_string(),
        };
        let msg = probe_failure_message(base, &refused);
        assert!(msg.contains(base));
        assert!(msg.contains("running"));
        assert!(msg.contains("check the URL"));

        let unauthorized = FhirError::Upstream {
            status: 401,
            message: "HTTP 401: Unauthorized".to_string(),
        };
        assert_eq!(
            probe_failure_message(base, &unauthorized),
            "Authentication failed. Please check your Aidbox credentials."
        );

        let forbidden = FhirError::Upstream {
            status: 403,
            message: "HTTP 403: Forbidden".to_string(),
        };
        assert_eq!(
            probe_failure_message(base, &forbidden),
            "Access forbidden. Please check your Aidbox permissions."
        );

        let timeout = FhirError::Network {
            kind: NetworkErrorKind::Timeout,
            message: "operation timed out".to_string(),
        };
        assert_eq!(
            probe_failure_message(base, &timeout),
            "Failed to connect to Aidbox: operation timed out"
        );
    }

    #[test]
    fn test_server_version_sources() {
        assert_eq!(server_version(&json!({"version": "2405.0"})), Some("2405.0"));
        assert_eq!(
            server_version(&json!({"software": {"version": "edge"}})),
            Some("edge")
        );
        assert_eq!(server_version(&json!({"fhirVersion": "4.0.1"})), Some("4.0.1"));
        assert_eq!(server_version(&Value::Null), None);
    }

    #[tokio::test]
    async fn test_search_sends_query_and_fhir_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fhir/Patient")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("family".into(), "Smith".into()),
                mockito::Matcher::UrlEncoded("_count".into(), "20".into()),
            ]))
            .match_header("accept", FHIR_JSON)
            .match_header("authorization", "Basic cm9vdDpzZWNyZXQ=")
            .with_status(200)
            .with_body(r#"{"resourceType":"Bundle","total":0,"entry":[]}"#)
            .create_async()
            .await;

        let fhir = client(&server.url());
        let params = vec![
            ("family".to_string(), "Smith".to_string()),
            ("_count".to_string(), "20".to_string()),
        ];
        let bundle = fhir.search("Patient", &params).await.unwrap();

        mock.assert_async().await;
        assert_eq!(bundle["resourceType"], "Bundle");
    }

    #[tokio::test]
    async fn test_update_puts_body_with_forced_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/fhir/Patient/pt-1")
            .match_header("content-type", FHIR_JSON)
            .match_body(mockito::Matcher::PartialJson(json!({"id": "pt-1"})))
            .with_status(200)
            .with_body(r#"{"resourceType":"Patient","id":"pt-1"}"#)
            .create_async()
            .await;

        let fhir = client(&server.url());
        let updated = fhir
            .update("Patient", "pt-1", json!({"resourceType": "Patient", "id": "stale"}))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(updated["id"], "pt-1");
    }

    #[tokio::test]
    async fn test_delete_returns_success_regardless_of_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/fhir/Patient/pt-1")
            .with_status(200)
            .with_body(r#"{"resourceType":"Patient","id":"pt-1"}"#)
            .create_async()
            .await;

        let fhir = client(&server.url());
        let result = fhir.delete("Patient", "pt-1").await.unwrap();
        assert_eq!(result, json!({"success": true}));
    }

    #[tokio::test]
    async fn test_get_surfaces_operation_outcome() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fhir/Patient/missing")
            .with_status(404)
            .with_body(
                r#"{"resourceType":"OperationOutcome","issue":[{"severity":"fatal","code":"not-found","diagnostics":"Resource Patient/missing not found"}]}"#,
            )
            .create_async()
            .await;

        let fhir = client(&server.url());
        let err = fhir.get("Patient", "missing").await.unwrap_err();
        assert_eq!(err.to_string(), "Resource Patient/missing not found");
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_connection_state_transitions() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/$version")
            .with_status(200)
            .with_body(r#"{"version":"2405.0"}"#)
            .create_async()
            .await;

        let fhir = client(&server.url());
        assert_eq!(fhir.connection_state().await, ConnectionState::Unknown);
        assert!(!fhir.is_connected().await);

        fhir.test_connection().await.unwrap();
        assert!(fhir.is_connected().await);

        fhir.disconnect().await;
        assert!(!fhir.is_connected().await);
        fhir.disconnect().await;
        assert_eq!(fhir.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_probe_non_200_success_is_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/$version")
            .with_status(204)
            .create_async()
            .await;

        let fhir = client(&server.url());
        let err = fhir.test_connection().await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to connect to Aidbox: HTTP 204: No Content");
        assert!(!fhir.is_connected().await);
    }

    #[tokio::test]
    async fn test_probe_forbidden() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/$version")
            .with_status(403)
            .expect(1)
            .create_async()
            .await;

        let fhir = client(&server.url());
        let err = fhir.test_connection().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Access forbidden. Please check your Aidbox permissions."
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let fhir = client("http://127.0.0.1:1");
        let err = fhir.test_connection().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("http://127.0.0.1:1"));
        assert!(msg.contains("Please ensure Aidbox is running and check the URL."));
        assert_eq!(fhir.connection_state().await, ConnectionState::Disconnected);
    }

    /// Collects formatted log output for assertions
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_failed_connection_leaves_error_logging_to_caller() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let fhir = client("http://127.0.0.1:1");
        fhir.test_connection().await.unwrap_err();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Aidbox probe failed"));
        assert!(!output.contains("ERROR"), "unexpected error log: {}", output);
    }
}
