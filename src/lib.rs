// Request orchestration and streaming progress for a local
// vision-language model behind an HTTP API.

pub mod web;

pub use web::error::ApiError;
pub use web::inference_queue::InferenceQueue;
