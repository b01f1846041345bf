// Request parsing utilities for HTTP handlers

use hyper::{Body, Response, StatusCode, Uri};
use serde::de::DeserializeOwned;

use super::response_helpers::json_error;
use crate::log_debug;

/// Parse JSON request body into a typed structure.
///
/// Returns the deserialized value on success, or an error Response on
/// failure, ready to hand back to the client.
pub async fn parse_json_body<T: DeserializeOwned>(
    body: Body,
    origin: &str,
) -> Result<T, Response<Body>> {
    let body_bytes = match hyper::body::to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                origin,
                "Failed to read request body",
            ));
        }
    };

    match serde_json::from_slice::<T>(&body_bytes) {
        Ok(parsed) => Ok(parsed),
        Err(e) => {
            log_debug!("[REQUEST] JSON parsing error: {}", e);
            Err(json_error(
                StatusCode::BAD_REQUEST,
                origin,
                "Invalid JSON format",
            ))
        }
    }
}

/// Extract a query parameter from URI.
///
/// Returns `Some(value)` if the parameter exists, `None` otherwise.
/// The value is URL-decoded automatically.
pub fn get_query_param(uri: &Uri, key: &str) -> Option<String> {
    let query = uri.query()?;

    for param in query.split('&') {
        if let Some((param_key, param_value)) = param.split_once('=') {
            if param_key == key {
                return urlencoding::decode(param_value)
                    .ok()
                    .map(|s| s.to_string());
            }
        }
    }

    None
}

/// One file extracted from a multipart/form-data body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Pull the first file field out of a multipart/form-data body.
///
/// `content_type` is the request's Content-Type header (carries the
/// boundary). Parts without a filename are skipped.
pub fn parse_multipart_file(content_type: &str, body: &[u8]) -> Result<UploadedFile, String> {
    let boundary = content_type
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .ok_or_else(|| "Missing multipart boundary".to_string())?;

    let delimiter = format!("--{boundary}");
    let delim = delimiter.as_bytes();

    // Offsets of every delimiter occurrence, including the closing one
    let mut offsets = Vec::new();
    let mut from = 0;
    while let Some(pos) = find_subsequence(&body[from..], delim) {
        offsets.push(from + pos);
        from += pos + delim.len();
    }
    if offsets.len() < 2 {
        return Err("Malformed multipart body".to_string());
    }

    for window in offsets.windows(2) {
        let start = window[0] + delim.len();
        let part = &body[start..window[1]];
        // Part content sits between a leading and a trailing CRLF
        let part = part.strip_prefix(b"\r\n").unwrap_or(part);
        let part = part.strip_suffix(b"\r\n").unwrap_or(part);

        let header_end = match find_subsequence(part, b"\r\n\r\n") {
            Some(i) => i,
            None => continue,
        };
        let headers = String::from_utf8_lossy(&part[..header_end]);
        let data = &part[header_end + 4..];

        let mut filename = None;
        let mut part_type = None;
        for line in headers.lines() {
            let lower = line.to_lowercase();
            if lower.starts_with("content-disposition:") && line.contains("filename=") {
                filename = line
                    .split("filename=")
                    .nth(1)
                    .and_then(|s| s.split(';').next())
                    .map(|s| s.trim().trim_matches('"').to_string());
            } else if lower.starts_with("content-type:") {
                part_type = line.splitn(2, ':').nth(1).map(|s| s.trim().to_string());
            }
        }

        if let Some(filename) = filename.filter(|f| !f.is_empty()) {
            return Ok(UploadedFile {
                filename,
                content_type: part_type,
                bytes: data.to_vec(),
            });
        }
    }

    Err("No file field in multipart body".to_string())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
