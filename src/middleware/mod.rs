// CORS and request logging middleware for the HTTP transport

use axum::{body::Body, http::HeaderName, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Header carrying the MCP session id
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Request logging middleware
///
/// Logs method, path, status and latency for every request, plus the MCP
/// session id when the client sent one.
pub async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let session = request
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let latency_ms = started.elapsed().as_millis() as u64;
    if status.is_server_error() {
        tracing::warn!(%method, %path, status = status.as_u16(), latency_ms, session = ?session, "Request failed");
    } else {
        tracing::info!(%method, %path, status = status.as_u16(), latency_ms, session = ?session, "Request handled");
    }

    response
}

/// Create CORS middleware layer
///
/// Allows all origins, methods and headers, and exposes the session header
/// so browser clients can read it.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{Request, StatusCode},
        routing::get,
        Router,
    };
    use tower::util::ServiceExt;

    async fn test_handler() -> &'static str {
        "OK"
    }

    fn create_test_app() -> Router {
        Router::new()
            .route("/test", get(test_handler))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(cors_layer())
    }

    #[tokio::test]
    async fn test_logging_middleware_passes_response_through() {
        let request = Request::builder()
            .uri("/test")
            .header(SESSION_HEADER, "aidbox-session-1")
            .body(Body::empty())
            .unwrap();

        let response = create_test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_layer_allows_all_origins() {
        let request = Request::builder()
            .uri("/test")
            .header("origin", "https://example.com")
            .body(Body::empty())
            .unwrap();

        let response = create_test_app().oneshot(request).await.unwrap();

        let allow_origin = response
            .headers()
            .get("access-control-allow-origin")
            .unwrap();
        assert_eq!(allow_origin, "*");
        let exposed = response
            .headers()
            .get("access-control-expose-headers")
            .unwrap();
        assert_eq!(exposed, SESSION_HEADER);
    }

    #[tokio::test]
    async fn test_cors_layer_handles_preflight_options() {
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/test")
            .header("origin", "https://example.com")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type, mcp-session-id")
            .body(Body::empty())
            .unwrap();

        let response = create_test_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-methods")
                .unwrap(),
            "*"
        );
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-headers")
                .unwrap(),
            "*"
        );
    }
}
