// Streaming progress: ordered events over long-lived responses
//
// The emitters push events through an unbounded channel; the transport
// tasks below frame them for the wire in send order. The transport choice
// (SSE frames vs JSON lines) never changes the event sequence.

use async_stream::stream;
use hyper::body::Bytes;
use hyper::Body;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::image_pipeline::{describe_upload, emit, process_folder, EventSink};
use super::inference_queue::InferenceQueue;
use super::models::{FolderRequest, ImageResult, StreamEvent};
use super::request_parsing::UploadedFile;

/// Spawn a folder job that reports progress through the returned receiver.
///
/// A failure before the first item (bad folder, bad request) becomes a
/// single job-level `error` event; per-item failures stay inside `result`
/// events and the job keeps going.
pub fn spawn_folder_stream(
    queue: InferenceQueue,
    request: FolderRequest,
) -> UnboundedReceiver<StreamEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Err(e) = process_folder(&queue, &request, Some(&tx)).await {
            let _ = tx.send(StreamEvent::Error {
                message: e.to_string(),
            });
        }
    });
    rx
}

/// Spawn a single-image job with progress markers around the inference call.
pub fn spawn_single_stream(
    queue: InferenceQueue,
    upload: UploadedFile,
) -> UnboundedReceiver<StreamEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        run_single_stream(&queue, &upload, &tx).await;
    });
    rx
}

async fn run_single_stream(queue: &InferenceQueue, upload: &UploadedFile, sink: &EventSink) {
    let filename = upload.filename.clone();
    let listening = emit(
        Some(sink),
        StreamEvent::Start {
            path: filename.clone(),
            index: 1,
            total: 1,
        },
    );
    if !listening {
        return;
    }

    emit(
        Some(sink),
        StreamEvent::Processing {
            message: format!("Saving {filename} to temp storage"),
        },
    );
    emit(
        Some(sink),
        StreamEvent::Processing {
            message: "Running inference".to_string(),
        },
    );

    let result = match describe_upload(queue, upload).await {
        Ok(description) => ImageResult::success(filename, description),
        Err(e) => ImageResult::failure(filename, &e),
    };

    emit(
        Some(sink),
        StreamEvent::Processing {
            message: "Inference complete".to_string(),
        },
    );
    emit(Some(sink), StreamEvent::from_result(&result));
    emit(Some(sink), StreamEvent::Complete { summary: None });
}

fn event_json(event: &StreamEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| {
        r#"{"type":"error","message":"Event serialization failed"}"#.to_string()
    })
}

/// Frame events as `data: <json>\n\n` for EventSource clients.
pub fn sse_body(mut rx: UnboundedReceiver<StreamEvent>) -> Body {
    let stream = stream! {
        while let Some(event) = rx.recv().await {
            let frame = format!("data: {}\n\n", event_json(&event));
            yield Ok::<_, std::convert::Infallible>(Bytes::from(frame));
        }
    };
    Body::wrap_stream(stream)
}

/// Frame events as one JSON object per line.
pub fn ndjson_body(mut rx: UnboundedReceiver<StreamEvent>) -> Body {
    let stream = stream! {
        while let Some(event) = rx.recv().await {
            let line = format!("{}\n", event_json(&event));
            yield Ok::<_, std::convert::Infallible>(Bytes::from(line));
        }
    };
    Body::wrap_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::inference_queue::tests::{test_queue, FakeBackend};
    use crate::web::models::ImageStatus;
    use std::fs::File;
    use std::time::Duration;

    async fn collect(mut rx: UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_folder_stream_missing_folder_is_one_error_event() {
        let queue = test_queue(FakeBackend::new(Duration::ZERO));
        let request = FolderRequest {
            folder_path: "/definitely/not/here".to_string(),
            extension: "jpg".to_string(),
            max_images: 7,
        };

        let events = collect(spawn_folder_stream(queue, request)).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error { message } if message.contains("not/here")));
    }

    #[tokio::test]
    async fn test_folder_stream_event_order() {
        let tmp = tempfile::tempdir().unwrap();
        File::create(tmp.path().join("a.jpg")).unwrap();
        File::create(tmp.path().join("b.jpg")).unwrap();

        let queue = test_queue(FakeBackend::new(Duration::ZERO));
        let request = FolderRequest {
            folder_path: tmp.path().to_str().unwrap().to_string(),
            extension: "jpg".to_string(),
            max_images: 7,
        };

        let events = collect(spawn_folder_stream(queue, request)).await;
        assert!(matches!(events[0], StreamEvent::Metadata { total_found: 2, .. }));
        assert!(matches!(events[1], StreamEvent::Start { index: 1, .. }));
        assert!(matches!(events[2], StreamEvent::Result { .. }));
        assert!(matches!(events[3], StreamEvent::Start { index: 2, .. }));
        assert!(matches!(events[4], StreamEvent::Result { .. }));
        assert!(matches!(events[5], StreamEvent::Complete { summary: Some(_) }));
        assert_eq!(events.len(), 6);
    }

    #[tokio::test]
    async fn test_single_stream_sequence() {
        let queue = test_queue(FakeBackend::new(Duration::ZERO));
        let upload = UploadedFile {
            filename: "photo.png".to_string(),
            content_type: Some("image/png".to_string()),
            bytes: vec![1, 2, 3],
        };

        let events = collect(spawn_single_stream(queue, upload)).await;

        assert!(matches!(events.first(), Some(StreamEvent::Start { .. })));
        assert!(matches!(events.last(), Some(StreamEvent::Complete { summary: None })));
        let result_pos = events
            .iter()
            .position(|e| matches!(e, StreamEvent::Result { .. }))
            .unwrap();
        let processing: Vec<usize> = events
            .iter()
            .enumerate()
            .filter_map(|(i, e)| matches!(e, StreamEvent::Processing { .. }).then_some(i))
            .collect();
        // Progress markers both sides of the inference call, all ahead of
        // the result event
        assert!(processing.len() >= 2);
        assert!(processing.iter().all(|&i| i < result_pos));
        match &events[result_pos] {
            StreamEvent::Result { path, status, .. } => {
                assert_eq!(path, "photo.png");
                assert_eq!(*status, ImageStatus::Success);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_single_stream_inference_failure_still_completes() {
        let queue = test_queue(FakeBackend::new(Duration::ZERO).failing_on(".png"));
        let upload = UploadedFile {
            filename: "photo.png".to_string(),
            content_type: Some("image/png".to_string()),
            bytes: vec![1, 2, 3],
        };

        let events = collect(spawn_single_stream(queue, upload)).await;
        let result = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::Result { status, error, .. } => Some((*status, error.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(result.0, ImageStatus::Error);
        assert!(result.1.unwrap().contains("cannot describe"));
        assert!(matches!(events.last(), Some(StreamEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn test_sse_framing() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamEvent::Processing {
            message: "working".to_string(),
        })
        .unwrap();
        tx.send(StreamEvent::Complete { summary: None }).unwrap();
        drop(tx);

        let bytes = hyper::body::to_bytes(sse_body(rx)).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("data: {\"type\":\"processing\""));
        assert_eq!(frames[1], r#"data: {"type":"complete"}"#);
    }

    #[tokio::test]
    async fn test_ndjson_framing() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamEvent::Start {
            path: "x.jpg".to_string(),
            index: 1,
            total: 1,
        })
        .unwrap();
        tx.send(StreamEvent::Complete { summary: None }).unwrap();
        drop(tx);

        let bytes = hyper::body::to_bytes(ndjson_body(rx)).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: StreamEvent = serde_json::from_str(lines[0]).unwrap();
        assert!(matches!(first, StreamEvent::Start { .. }));
    }
}
