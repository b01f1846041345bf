// Folder preview route handler: enumeration only, no inference

use hyper::{Body, Request, Response, StatusCode};
use std::convert::Infallible;

use crate::web::folders::list_images;
use crate::web::models::{PreviewRequest, PreviewResponse};
use crate::web::request_parsing::parse_json_body;
use crate::web::response_helpers::{json_error, json_response};

/// `POST /preview/folder` — list what a folder job would pick up.
pub async fn handle(
    req: Request<Body>,
    origin: &'static str,
) -> Result<Response<Body>, Infallible> {
    let request: PreviewRequest = match parse_json_body(req.into_body(), origin).await {
        Ok(parsed) => parsed,
        Err(response) => return Ok(response),
    };

    match list_images(&request.folder_path, &request.extension) {
        Ok(paths) => {
            let image_paths: Vec<String> =
                paths.iter().map(|p| p.display().to_string()).collect();
            Ok(json_response(
                StatusCode::OK,
                origin,
                &PreviewResponse {
                    folder_path: request.folder_path,
                    extension: request.extension,
                    total_found: image_paths.len(),
                    image_paths,
                },
            ))
        }
        Err(e) => Ok(json_error(e.status_code(), origin, &e.to_string())),
    }
}
