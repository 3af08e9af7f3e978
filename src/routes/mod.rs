use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::converters::args_to_fhir::fhir_timestamp;
use crate::fhir_client::FhirClient;
use crate::middleware::{self, SESSION_HEADER};
use crate::models::mcp::{error_codes, methods, JsonRpcError, JsonRpcResponse};
use crate::server::{McpServer, SERVER_NAME, VERSION};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub server: McpServer,
    pub client: Arc<FhirClient>,
}

impl AppState {
    pub fn new(server: McpServer) -> Self {
        let client = Arc::clone(server.tools().client());
        Self { server, client }
    }
}

/// Full HTTP application: info, health and the MCP endpoints
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(mcp_routes())
        .layer(axum_middleware::from_fn(middleware::request_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::cors_layer())
        .with_state(state)
}

/// Info and health routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
}

/// JSON-RPC endpoints; `/` answers GET with server info and POST with MCP
pub fn mcp_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root_handler).post(mcp_handler))
        .route("/mcp", axum::routing::post(mcp_handler))
}

/// GET / - Server information
async fn root_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": SERVER_NAME,
        "version": VERSION,
        "description": "Aidbox MCP Server with FHIR tools",
        "endpoints": {
            "health": "/health",
            "mcp": "/mcp or /",
        },
        "tools": state.server.tools().list_tools().len(),
    }))
}

/// GET /health - Liveness plus the last known Aidbox connection state
///
/// Always 200: a disconnected Aidbox is reported, not treated as unhealthy.
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "server": SERVER_NAME,
        "version": VERSION,
        "aidbox": {
            "url": state.client.base_url(),
            "connected": state.client.is_connected().await,
        },
        "timestamp": fhir_timestamp(Utc::now()),
    }))
}

/// POST /mcp and POST / - One JSON-RPC message per request
///
/// Parse errors, invalid requests and unknown methods answer 400; notifications
/// answer 202 with an empty body. An `initialize` without a session header gets a
/// fresh session id echoed back; ids are not stored or enforced.
async fn mcp_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed JSON-RPC body");
            let response = JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error(e));
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    let existing_session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let is_initialize = message.get("method").and_then(Value::as_str) == Some(methods::INITIALIZE);

    let new_session = match (&existing_session, is_initialize) {
        (None, true) => {
            let session_id = format!("aidbox-session-{}", Uuid::new_v4());
            tracing::info!(session = %session_id, "New MCP session initialized");
            Some(session_id)
        }
        _ => None,
    };

    let response = match state.server.handle_value(message).await {
        Some(response) => response,
        None => return StatusCode::ACCEPTED.into_response(),
    };

    let status = match response.error_code() {
        Some(error_codes::PARSE_ERROR)
        | Some(error_codes::INVALID_REQUEST)
        | Some(error_codes::METHOD_NOT_FOUND) => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };

    let mut http_response = (status, Json(response)).into_response();
    if let Some(session_id) = new_session {
        if let Ok(value) = HeaderValue::from_str(&session_id) {
            http_response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    http_response
}
