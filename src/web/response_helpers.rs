// HTTP response helper functions to reduce duplication across route handlers

use hyper::{Body, Request, Response, StatusCode};
use serde::Serialize;

/// Development origins allowed to call this API from a browser.
pub const ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

const CORS_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const CORS_HEADERS: &str = "content-type, authorization";

/// Echo the request origin when it is allow-listed, otherwise fall back to
/// the first development origin. Never echoes arbitrary origins.
pub fn resolve_origin(origin: Option<&str>) -> &'static str {
    match origin {
        Some(o) => ALLOWED_ORIGINS
            .iter()
            .find(|&&allowed| allowed == o)
            .copied()
            .unwrap_or(ALLOWED_ORIGINS[0]),
        None => ALLOWED_ORIGINS[0],
    }
}

/// Extract and resolve the Origin header of a request.
pub fn request_origin<B>(req: &Request<B>) -> &'static str {
    resolve_origin(req.headers().get("origin").and_then(|h| h.to_str().ok()))
}

/// Build a JSON response with CORS headers
pub fn json_response<T: Serialize>(status: StatusCode, origin: &str, body: &T) -> Response<Body> {
    let json = serde_json::to_string(body)
        .unwrap_or_else(|_| r#"{"error":"Serialization failed"}"#.to_string());
    json_raw(status, origin, json)
}

/// Build a JSON error response
pub fn json_error(status: StatusCode, origin: &str, message: &str) -> Response<Body> {
    let json = format!(r#"{{"error":"{}"}}"#, message.replace('"', "\\\""));
    json_raw(status, origin, json)
}

/// Build a raw JSON string response
pub fn json_raw(status: StatusCode, origin: &str, json: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("access-control-allow-origin", origin)
        .header("access-control-allow-methods", CORS_METHODS)
        .header("access-control-allow-headers", CORS_HEADERS)
        .body(Body::from(json))
        .unwrap()
}

/// Build an empty response with CORS headers
pub fn empty_response(status: StatusCode, origin: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("access-control-allow-origin", origin)
        .header("access-control-allow-methods", CORS_METHODS)
        .header("access-control-allow-headers", CORS_HEADERS)
        .body(Body::empty())
        .unwrap()
}

/// CORS preflight response
pub fn cors_preflight(origin: &str) -> Response<Body> {
    empty_response(StatusCode::OK, origin)
}

/// Raw bytes with an explicit content type (used to serve image files).
pub fn bytes_response(
    status: StatusCode,
    origin: &str,
    content_type: &str,
    bytes: Vec<u8>,
) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", content_type)
        .header("access-control-allow-origin", origin)
        .body(Body::from(bytes))
        .unwrap()
}

/// Server-push event stream response. The anti-buffering headers are needed
/// for browser EventSource clients behind proxies.
pub fn sse_response(origin: &str, body: Body) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("access-control-allow-origin", origin)
        .header("connection", "keep-alive")
        .header("x-accel-buffering", "no") // Disable nginx buffering
        .body(body)
        .unwrap()
}

/// Line-delimited JSON stream response.
pub fn ndjson_response(origin: &str, body: Body) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/x-ndjson")
        .header("cache-control", "no-cache")
        .header("access-control-allow-origin", origin)
        .header("x-accel-buffering", "no")
        .body(body)
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error() {
        let response = json_error(StatusCode::BAD_REQUEST, ALLOWED_ORIGINS[0], "Test error");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_json_error_escapes_quotes() {
        let response = json_error(
            StatusCode::BAD_REQUEST,
            ALLOWED_ORIGINS[0],
            r#"Error "quoted""#,
        );
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_resolve_origin_echoes_allowed() {
        assert_eq!(
            resolve_origin(Some("http://localhost:3000")),
            "http://localhost:3000"
        );
    }

    #[test]
    fn test_resolve_origin_rejects_unknown() {
        assert_eq!(resolve_origin(Some("https://evil.example")), ALLOWED_ORIGINS[0]);
        assert_eq!(resolve_origin(None), ALLOWED_ORIGINS[0]);
    }

    #[test]
    fn test_sse_headers() {
        let response = sse_response(ALLOWED_ORIGINS[0], Body::empty());
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");
    }
}
