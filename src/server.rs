// MCP request handling shared by the stdio and HTTP transports

use serde_json::{json, Value};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::models::mcp::{
    error_codes, methods, CallToolParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo, PROTOCOL_VERSION,
};
use crate::tools::ToolRegistry;

/// Server name reported by `initialize` and the HTTP info endpoints
pub const SERVER_NAME: &str = "aidbox-mcp-server";

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// JSON-RPC dispatcher for the MCP methods this server supports
#[derive(Clone)]
pub struct McpServer {
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Handle one raw JSON-RPC message.
    ///
    /// Returns `None` for notifications. Malformed JSON yields a parse error
    /// with a null id; well-formed JSON that is not a request yields an
    /// invalid-request error.
    pub async fn handle_message(&self, raw: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to parse JSON-RPC message");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::parse_error(e),
                ));
            }
        };

        self.handle_value(value).await
    }

    /// Handle a message that has already been parsed as JSON
    pub async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(JsonRpcResponse::failure(
                id,
                JsonRpcError {
                    code: error_codes::INVALID_REQUEST,
                    message: "Invalid Request".to_string(),
                    data: Some(Value::String(e.to_string())),
                },
            )),
        }
    }

    /// Handle a parsed request; notifications produce no response
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "Handling MCP request");

        let id = match request.id {
            Some(id) => id,
            None => {
                if !request.method.starts_with(methods::NOTIFICATION_PREFIX) {
                    debug!(method = %request.method, "Ignoring request without id");
                }
                return None;
            }
        };

        let response = match request.method.as_str() {
            methods::INITIALIZE => result_response(id, initialize_result()),
            methods::PING => JsonRpcResponse::success(id, json!({})),
            methods::LIST_TOOLS => {
                let result = ListToolsResult {
                    tools: self.tools.list_tools(),
                };
                result_response(id, result)
            }
            methods::CALL_TOOL => match serde_json::from_value::<CallToolParams>(request.params) {
                Ok(params) => {
                    let result = self.tools.call_tool(&params.name, params.arguments).await;
                    result_response(id, result)
                }
                Err(e) => JsonRpcResponse::failure(
                    id,
                    JsonRpcError {
                        code: error_codes::INVALID_PARAMS,
                        message: "Invalid params".to_string(),
                        data: Some(Value::String(e.to_string())),
                    },
                ),
            },
            other => {
                warn!(method = %other, "Method not found");
                JsonRpcResponse::failure(id, JsonRpcError::method_not_found())
            }
        };

        Some(response)
    }
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities::default(),
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: VERSION.to_string(),
        },
    }
}

/// Wrap a method result, answering -32603 when it cannot be encoded
fn result_response<T: Serialize>(id: Value, result: T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => {
            error!(error = %e, "Failed to encode JSON-RPC result");
            JsonRpcResponse::failure(id, JsonRpcError::internal_error(e))
        }
    }
}
