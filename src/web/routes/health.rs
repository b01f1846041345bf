// Health check and banner route handlers

use hyper::{Body, Response, StatusCode};
use std::convert::Infallible;

use crate::web::response_helpers::json_raw;

pub async fn handle(origin: &'static str) -> Result<Response<Body>, Infallible> {
    Ok(json_raw(
        StatusCode::OK,
        origin,
        r#"{"status":"ok","service":"image-describe-web"}"#.to_string(),
    ))
}

pub async fn handle_root(origin: &'static str) -> Result<Response<Body>, Infallible> {
    Ok(json_raw(
        StatusCode::OK,
        origin,
        r#"{"message":"Image describe service is running"}"#.to_string(),
    ))
}
