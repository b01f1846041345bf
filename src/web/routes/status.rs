// Model status route handler

use hyper::{Body, Response, StatusCode};
use std::convert::Infallible;
use std::path::Path;

use crate::web::model_manager::{get_model_status, SharedModelState};
use crate::web::response_helpers::json_response;

/// `GET /model/status` — where the model is in its lifecycle.
pub async fn handle(
    state: SharedModelState,
    model_dir: &Path,
    origin: &'static str,
) -> Result<Response<Body>, Infallible> {
    Ok(json_response(
        StatusCode::OK,
        origin,
        &get_model_status(&state, model_dir),
    ))
}
