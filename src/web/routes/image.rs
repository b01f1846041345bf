// Raw image serving for the frontend, with path validation

use hyper::{Body, Response, StatusCode};
use std::convert::Infallible;
use std::path::{Component, PathBuf};

use crate::web::error::ApiError;
use crate::web::models::is_accepted_extension;
use crate::web::response_helpers::{bytes_response, json_error};
use crate::log_debug;

/// `GET /image/{encoded_path}` — serve raw bytes for a validated path.
pub async fn handle(uri_path: &str, origin: &'static str) -> Result<Response<Body>, Infallible> {
    let encoded = uri_path.strip_prefix("/image/").unwrap_or("");

    let file_path = match resolve_image_path(encoded) {
        Ok(path) => path,
        Err(e) => {
            log_debug!("Rejected image path {}: {}", encoded, e);
            return Ok(json_error(e.status_code(), origin, &e.to_string()));
        }
    };

    match tokio::fs::read(&file_path).await {
        Ok(bytes) => {
            let extension = file_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            Ok(bytes_response(
                StatusCode::OK,
                origin,
                content_type_for(extension),
                bytes,
            ))
        }
        Err(e) => Ok(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            origin,
            &format!("Failed to read image: {e}"),
        )),
    }
}

/// Decode and validate a client-supplied image path.
///
/// Only absolute paths with no parent-directory components and an accepted
/// image extension may be served; anything else never reaches the
/// filesystem read.
pub fn resolve_image_path(encoded: &str) -> Result<PathBuf, ApiError> {
    let decoded = urlencoding::decode(encoded)
        .map_err(|_| ApiError::invalid_input("Malformed path encoding"))?;
    let path = PathBuf::from(decoded.as_ref());

    if !path.is_absolute() {
        return Err(ApiError::invalid_input("Only absolute paths are allowed"));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ApiError::invalid_input("Path traversal is not allowed"));
    }

    if !path.exists() {
        return Err(ApiError::not_found("Image not found"));
    }
    if !path.is_file() {
        return Err(ApiError::invalid_input("Path is not a file"));
    }

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if !is_accepted_extension(extension) {
        return Err(ApiError::invalid_input("File is not an image"));
    }

    Ok(path)
}

/// Content type for an accepted image extension.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "webp" => "image/webp",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    fn encode(path: &Path) -> String {
        urlencoding::encode(path.to_str().unwrap()).to_string()
    }

    #[test]
    fn test_traversal_is_rejected() {
        let err = resolve_image_path("..%2F..%2Fetc%2Fpasswd").unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = resolve_image_path("%2Ftmp%2F..%2Fetc%2Fpasswd").unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn test_relative_path_is_rejected() {
        let err = resolve_image_path("pics%2Fcat.jpg").unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn test_non_image_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let secret = tmp.path().join("secret.conf");
        File::create(&secret).unwrap().write_all(b"hush").unwrap();

        let err = resolve_image_path(&encode(&secret)).unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = resolve_image_path("%2Fno%2Fsuch%2Fpicture.png").unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_valid_image_path_resolves() {
        let tmp = tempfile::tempdir().unwrap();
        let picture = tmp.path().join("cat.png");
        File::create(&picture).unwrap().write_all(b"png!").unwrap();

        let resolved = resolve_image_path(&encode(&picture)).unwrap();
        assert_eq!(resolved, picture);
    }

    #[test]
    fn test_directory_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = resolve_image_path(&encode(tmp.path())).unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("jpg"), "image/jpeg");
        assert_eq!(content_type_for("JPEG"), "image/jpeg");
        assert_eq!(content_type_for("png"), "image/png");
        assert_eq!(content_type_for("webp"), "image/webp");
        assert_eq!(content_type_for("bin"), "application/octet-stream");
    }
}
