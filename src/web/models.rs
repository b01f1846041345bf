// Shared data structures for the image describe web server

use serde::{Deserialize, Serialize};

use super::error::ApiError;

/// File extensions the service accepts as images, lowercase.
pub const ACCEPTED_IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp", "heic",
];

/// Hard cap on how many images one folder job may attempt.
pub const MAX_BATCH_IMAGES: usize = 100;

/// Check a filename extension against the accepted image set.
pub fn is_accepted_extension(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    ACCEPTED_IMAGE_EXTENSIONS.iter().any(|&e| e == ext)
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Success,
    Error,
}

/// Outcome of one processed image. Immutable once created.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ImageResult {
    #[serde(rename = "image_path")]
    pub source: String,
    pub status: ImageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageResult {
    pub fn success(source: impl Into<String>, description: impl Into<String>) -> Self {
        ImageResult {
            source: source.into(),
            status: ImageStatus::Success,
            description: Some(description.into()),
            error: None,
        }
    }

    pub fn failure(source: impl Into<String>, error: &ApiError) -> Self {
        ImageResult {
            source: source.into(),
            status: ImageStatus::Error,
            description: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ImageStatus::Success
    }
}

/// Request body for folder processing.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FolderRequest {
    pub folder_path: String,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_max_images")]
    pub max_images: usize,
}

fn default_extension() -> String {
    "jpg".to_string()
}

fn default_max_images() -> usize {
    7
}

/// Request body for folder preview (enumeration only, no inference).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PreviewRequest {
    pub folder_path: String,
    #[serde(default = "default_extension")]
    pub extension: String,
}

/// Aggregated outcome of one folder job.
///
/// `total_found >= attempted` and `attempted == successful + failed` hold
/// for every summary this server produces; the counters are derived from
/// `results`, never tracked separately.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FolderSummary {
    pub folder_path: String,
    pub extension: String,
    pub total_found: usize,
    pub attempted: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<ImageResult>,
}

/// Response body for a successful single-image request.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SingleImageResponse {
    pub filename: String,
    pub status: ImageStatus,
    pub description: String,
}

/// Response body for folder preview.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PreviewResponse {
    pub folder_path: String,
    pub extension: String,
    pub total_found: usize,
    pub image_paths: Vec<String>,
}

/// Response body for the model status endpoint.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelStatusResponse {
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub model_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One progress event on a streaming connection.
///
/// Events for one job form a strictly ordered sequence: one `metadata`
/// (folder) or `start` (single image) opens the job, each attempted item
/// produces a `start`/`result` pair, and exactly one `complete` or
/// job-level `error` closes the stream.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Metadata {
        folder_path: String,
        extension: String,
        total_found: usize,
    },
    /// Emitted immediately before an item is processed. `index` is 1-based.
    Start {
        path: String,
        index: usize,
        total: usize,
    },
    Processing {
        message: String,
    },
    Result {
        path: String,
        status: ImageStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<FolderSummary>,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// Build a `result` event from a finished item.
    pub fn from_result(result: &ImageResult) -> Self {
        StreamEvent::Result {
            path: result.source.clone(),
            status: result.status,
            description: result.description.clone(),
            error: result.error.clone(),
        }
    }
}
