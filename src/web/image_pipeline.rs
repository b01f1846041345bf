// Single-image pipeline and sequential folder batch processing

use std::path::Path;

use tokio::sync::mpsc::UnboundedSender;

use super::error::ApiError;
use super::folders::list_images;
use super::inference_queue::InferenceQueue;
use super::models::{
    is_accepted_extension, FolderRequest, FolderSummary, ImageResult, StreamEvent,
    MAX_BATCH_IMAGES,
};
use super::request_parsing::UploadedFile;
use crate::{log_info, log_warn};

/// Sink for progress events. `None` disables progress reporting; a closed
/// sink means the client went away.
pub type EventSink = UnboundedSender<StreamEvent>;

/// Send an event if a sink is attached. Returns false once the receiving
/// side is gone.
pub fn emit(sink: Option<&EventSink>, event: StreamEvent) -> bool {
    match sink {
        Some(tx) => tx.send(event).is_ok(),
        None => true,
    }
}

/// Check an upload's declared type before it goes anywhere near the model.
pub fn validate_upload(upload: &UploadedFile) -> Result<(), ApiError> {
    match upload.content_type.as_deref() {
        Some(content_type) if content_type.starts_with("image/") => Ok(()),
        Some(content_type) => Err(ApiError::invalid_input(format!(
            "File must be an image (received: {content_type})"
        ))),
        None => {
            let extension = Path::new(&upload.filename)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            if is_accepted_extension(extension) {
                Ok(())
            } else {
                Err(ApiError::invalid_input(format!(
                    "File must be an image (received: {})",
                    upload.filename
                )))
            }
        }
    }
}

/// Validate an upload and drive it through the inference queue.
///
/// The upload is materialized into a temp directory whose removal is tied
/// to the guard's drop, so the file disappears on every exit path.
pub async fn describe_upload(
    queue: &InferenceQueue,
    upload: &UploadedFile,
) -> Result<String, ApiError> {
    validate_upload(upload)?;

    let temp_dir = tempfile::tempdir()
        .map_err(|e| ApiError::internal(format!("Failed to create temp dir: {e}")))?;
    let extension = Path::new(&upload.filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg");
    let temp_path = temp_dir
        .path()
        .join(format!("{}.{}", uuid::Uuid::new_v4(), extension));

    tokio::fs::write(&temp_path, &upload.bytes)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to save upload: {e}")))?;

    log_info!(
        "Processing uploaded file: {} ({} bytes)",
        upload.filename,
        upload.bytes.len()
    );

    queue.describe(temp_path).await
    // temp_dir drops here, deleting the materialized file
}

/// Describe one on-disk image, mapping every failure into an error result.
///
/// Never raises past this boundary; batch jobs depend on that.
pub async fn describe_path(queue: &InferenceQueue, image_path: &Path) -> ImageResult {
    let source = image_path.display().to_string();

    let extension = image_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    if !is_accepted_extension(extension) {
        let err = ApiError::invalid_input(format!("Not a recognized image type: {source}"));
        return ImageResult::failure(source, &err);
    }

    match queue.describe(image_path.to_path_buf()).await {
        Ok(description) => ImageResult::success(source, description),
        Err(e) => {
            log_warn!("Failed to describe {}: {}", source, e);
            ImageResult::failure(source, &e)
        }
    }
}

fn validate_folder_request(request: &FolderRequest) -> Result<(), ApiError> {
    if request.extension.trim().is_empty() {
        return Err(ApiError::invalid_input("Extension must not be empty"));
    }
    if request.max_images == 0 {
        return Err(ApiError::invalid_input("max_images must be at least 1"));
    }
    if request.max_images > MAX_BATCH_IMAGES {
        return Err(ApiError::invalid_input(format!(
            "max_images must be at most {MAX_BATCH_IMAGES}"
        )));
    }
    Ok(())
}

/// Run one folder job: enumerate, then describe items sequentially.
///
/// Enumeration and validation failures abort before any inference starts.
/// Per-item failures are recorded in the summary and never abort the
/// batch. Items beyond `max_images` are counted in `total_found` only.
/// A closed sink stops the loop between items; inference in flight for
/// the current item always completes.
pub async fn process_folder(
    queue: &InferenceQueue,
    request: &FolderRequest,
    sink: Option<&EventSink>,
) -> Result<FolderSummary, ApiError> {
    validate_folder_request(request)?;
    let paths = list_images(&request.folder_path, &request.extension)?;
    let total_found = paths.len();
    let attempt_count = total_found.min(request.max_images);

    log_info!(
        "Folder job {}: {} matches, attempting {}",
        request.folder_path,
        total_found,
        attempt_count
    );

    emit(
        sink,
        StreamEvent::Metadata {
            folder_path: request.folder_path.clone(),
            extension: request.extension.clone(),
            total_found,
        },
    );

    let mut results = Vec::with_capacity(attempt_count);
    for (i, path) in paths.iter().take(request.max_images).enumerate() {
        let listening = emit(
            sink,
            StreamEvent::Start {
                path: path.display().to_string(),
                index: i + 1,
                total: attempt_count,
            },
        );
        if !listening {
            log_info!(
                "Client disconnected; stopping folder job for {}",
                request.folder_path
            );
            break;
        }

        let result = describe_path(queue, path).await;
        let delivered = emit(sink, StreamEvent::from_result(&result));
        results.push(result);

        if !delivered {
            log_info!(
                "Client disconnected; stopping folder job for {}",
                request.folder_path
            );
            break;
        }
    }

    // Counters are derived from the results, never tracked separately
    let successful = results.iter().filter(|r| r.is_success()).count();
    let failed = results.len() - successful;
    let summary = FolderSummary {
        folder_path: request.folder_path.clone(),
        extension: request.extension.clone(),
        total_found,
        attempted: results.len(),
        successful,
        failed,
        results,
    };

    emit(
        sink,
        StreamEvent::Complete {
            summary: Some(summary.clone()),
        },
    );

    Ok(summary)
}
