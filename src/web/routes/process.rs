// Image and folder processing route handlers

use hyper::{Body, Request, Response, StatusCode};
use std::convert::Infallible;

use crate::web::image_pipeline::{describe_upload, process_folder, validate_upload};
use crate::web::inference_queue::InferenceQueue;
use crate::web::model_manager::is_terminally_unavailable;
use crate::web::models::{FolderRequest, ImageStatus, SingleImageResponse};
use crate::web::request_parsing::{
    get_query_param, parse_json_body, parse_multipart_file, UploadedFile,
};
use crate::web::response_helpers::{json_error, json_response, ndjson_response, sse_response};
use crate::web::streaming::{ndjson_body, spawn_folder_stream, spawn_single_stream, sse_body};
use crate::log_info;

/// Read the multipart upload out of a request, or produce the 400 that
/// explains what went wrong.
async fn extract_upload(
    req: Request<Body>,
    origin: &'static str,
) -> Result<UploadedFile, Response<Body>> {
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !content_type.starts_with("multipart/form-data") {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            origin,
            "Expected a multipart/form-data upload",
        ));
    }

    let body_bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                origin,
                "Failed to read request body",
            ));
        }
    };

    parse_multipart_file(&content_type, &body_bytes)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, origin, &e))
}

/// `POST /process/image` — one upload in, one description out.
pub async fn handle_post_image(
    req: Request<Body>,
    queue: InferenceQueue,
    origin: &'static str,
) -> Result<Response<Body>, Infallible> {
    if is_terminally_unavailable(queue.model_state()) {
        return Ok(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            origin,
            "Model is not available",
        ));
    }

    let upload = match extract_upload(req, origin).await {
        Ok(upload) => upload,
        Err(response) => return Ok(response),
    };

    log_info!(
        "Received file: filename={}, content_type={:?}",
        upload.filename,
        upload.content_type
    );

    match describe_upload(&queue, &upload).await {
        Ok(description) => Ok(json_response(
            StatusCode::OK,
            origin,
            &SingleImageResponse {
                filename: upload.filename,
                status: ImageStatus::Success,
                description,
            },
        )),
        Err(e) => Ok(json_error(e.status_code(), origin, &e.to_string())),
    }
}

/// `POST /process/image/stream` — same pipeline, progress as JSON lines.
pub async fn handle_post_image_stream(
    req: Request<Body>,
    queue: InferenceQueue,
    origin: &'static str,
) -> Result<Response<Body>, Infallible> {
    if is_terminally_unavailable(queue.model_state()) {
        return Ok(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            origin,
            "Model is not available",
        ));
    }

    let upload = match extract_upload(req, origin).await {
        Ok(upload) => upload,
        Err(response) => return Ok(response),
    };

    // Reject bad uploads while a proper status code is still possible
    if let Err(e) = validate_upload(&upload) {
        return Ok(json_error(e.status_code(), origin, &e.to_string()));
    }

    let rx = spawn_single_stream(queue, upload);
    Ok(ndjson_response(origin, ndjson_body(rx)))
}

/// `POST /process/folder` — run a whole folder job, one final summary.
pub async fn handle_post_folder(
    req: Request<Body>,
    queue: InferenceQueue,
    origin: &'static str,
) -> Result<Response<Body>, Infallible> {
    // Fail before any enumeration when inference cannot succeed
    if is_terminally_unavailable(queue.model_state()) {
        return Ok(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            origin,
            "Model is not available",
        ));
    }

    let request: FolderRequest = match parse_json_body(req.into_body(), origin).await {
        Ok(parsed) => parsed,
        Err(response) => return Ok(response),
    };

    match process_folder(&queue, &request, None).await {
        Ok(summary) => Ok(json_response(StatusCode::OK, origin, &summary)),
        Err(e) => Ok(json_error(e.status_code(), origin, &e.to_string())),
    }
}

/// `GET /process/folder/stream` — the same folder job over SSE.
///
/// GET with query parameters because EventSource cannot POST.
pub async fn handle_get_folder_stream(
    req: Request<Body>,
    queue: InferenceQueue,
    origin: &'static str,
) -> Result<Response<Body>, Infallible> {
    if is_terminally_unavailable(queue.model_state()) {
        return Ok(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            origin,
            "Model is not available",
        ));
    }

    let folder_path = match get_query_param(req.uri(), "folder_path") {
        Some(path) if !path.is_empty() => path,
        _ => {
            return Ok(json_error(
                StatusCode::BAD_REQUEST,
                origin,
                "folder_path query parameter is required",
            ));
        }
    };
    let extension = get_query_param(req.uri(), "extension").unwrap_or_else(|| "jpg".to_string());
    let max_images = match get_query_param(req.uri(), "max_images") {
        None => 7,
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                return Ok(json_error(
                    StatusCode::BAD_REQUEST,
                    origin,
                    "max_images must be a number",
                ));
            }
        },
    };

    let request = FolderRequest {
        folder_path,
        extension,
        max_images,
    };

    let rx = spawn_folder_stream(queue, request);
    Ok(sse_response(origin, sse_body(rx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::inference_queue::tests::{test_queue, FakeBackend};
    use crate::web::model_manager::{current_state, new_shared_state, ModelState};
    use crate::web::models::FolderSummary;
    use crate::web::response_helpers::ALLOWED_ORIGINS;
    use std::time::Duration;

    const ORIGIN: &str = ALLOWED_ORIGINS[0];

    /// Queue whose one load attempt has already failed.
    async fn failed_queue() -> InferenceQueue {
        let state = new_shared_state();
        let queue = InferenceQueue::spawn(
            4,
            state.clone(),
            Box::new(|| Err("missing model files".to_string())),
        );
        queue.warmup().await;
        for _ in 0..50 {
            if matches!(current_state(&state), ModelState::Failed(_)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        queue
    }

    fn folder_body(path: &str) -> Body {
        Body::from(format!(r#"{{"folder_path":"{path}"}}"#))
    }

    #[tokio::test]
    async fn test_post_folder_503_when_model_failed() {
        // A real folder that must never be enumerated
        let tmp = tempfile::tempdir().unwrap();
        std::fs::File::create(tmp.path().join("a.jpg")).unwrap();

        let queue = failed_queue().await;
        let req = Request::builder()
            .method("POST")
            .uri("/process/folder")
            .body(folder_body(tmp.path().to_str().unwrap()))
            .unwrap();

        let response = handle_post_folder(req, queue, ORIGIN).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_post_image_503_when_model_failed() {
        let queue = failed_queue().await;
        let req = Request::builder()
            .method("POST")
            .uri("/process/image")
            .header("content-type", "multipart/form-data; boundary=x")
            .body(Body::from("--x--"))
            .unwrap();

        let response = handle_post_image(req, queue, ORIGIN).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_post_folder_summary_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::File::create(tmp.path().join("a.jpg")).unwrap();
        std::fs::File::create(tmp.path().join("b.jpg")).unwrap();

        let queue = test_queue(FakeBackend::new(Duration::ZERO));
        let req = Request::builder()
            .method("POST")
            .uri("/process/folder")
            .body(folder_body(tmp.path().to_str().unwrap()))
            .unwrap();

        let response = handle_post_folder(req, queue, ORIGIN).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let summary: FolderSummary = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(summary.total_found, 2);
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.successful, 2);
    }

    #[tokio::test]
    async fn test_post_folder_missing_folder_is_404() {
        let queue = test_queue(FakeBackend::new(Duration::ZERO));
        let req = Request::builder()
            .method("POST")
            .uri("/process/folder")
            .body(folder_body("/definitely/not/here"))
            .unwrap();

        let response = handle_post_folder(req, queue, ORIGIN).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_image_rejects_non_multipart() {
        let queue = test_queue(FakeBackend::new(Duration::ZERO));
        let req = Request::builder()
            .method("POST")
            .uri("/process/image")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let response = handle_post_image(req, queue, ORIGIN).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_folder_stream_requires_folder_path() {
        let queue = test_queue(FakeBackend::new(Duration::ZERO));
        let req = Request::builder()
            .method("GET")
            .uri("/process/folder/stream?extension=jpg")
            .body(Body::empty())
            .unwrap();

        let response = handle_get_folder_stream(req, queue, ORIGIN).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_folder_stream_is_sse() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::File::create(tmp.path().join("a.jpg")).unwrap();

        let queue = test_queue(FakeBackend::new(Duration::ZERO));
        let uri = format!(
            "/process/folder/stream?folder_path={}",
            urlencoding::encode(tmp.path().to_str().unwrap())
        );
        let req = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();

        let response = handle_get_folder_stream(req, queue, ORIGIN).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(r#"data: {"type":"metadata""#));
        assert!(text.contains(r#""type":"complete""#));
    }
}
