//! Inference request queue enforcing the single-flight gate.
//!
//! Routes submit jobs to a bounded MPSC channel. A single worker task
//! processes them sequentially via `spawn_blocking`, so at most one model
//! call executes at any time and admission is FIFO. The worker owns the
//! backend outright; nothing else can reach the model.

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use super::captioner::CaptionBackend;
use super::error::ApiError;
use super::model_manager::{current_state, set_state, BackendLoader, ModelState, SharedModelState};
use crate::{log_error, log_info};

enum InferenceJob {
    /// Describe one image; the outcome goes back on the oneshot.
    Describe {
        image_path: PathBuf,
        respond_to: oneshot::Sender<Result<String, ApiError>>,
    },
    /// Trigger the one-time model load without running inference.
    Warmup,
    /// Drop the backend and stop the worker.
    Shutdown { done: oneshot::Sender<()> },
}

/// Cloneable handle that route handlers use to submit inference work.
#[derive(Clone)]
pub struct InferenceQueue {
    tx: mpsc::Sender<InferenceJob>,
    model_state: SharedModelState,
}

impl InferenceQueue {
    /// Create the queue and spawn the background worker.
    ///
    /// `capacity` bounds how many requests may wait. A full queue rejects
    /// new work immediately instead of building unbounded latency.
    pub fn spawn(capacity: usize, model_state: SharedModelState, loader: BackendLoader) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(inference_worker(rx, model_state.clone(), loader));
        Self { tx, model_state }
    }

    pub fn model_state(&self) -> &SharedModelState {
        &self.model_state
    }

    /// Describe one image, waiting for the worker to get to it.
    pub async fn describe(&self, image_path: PathBuf) -> Result<String, ApiError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .try_send(InferenceJob::Describe {
                image_path,
                respond_to,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ApiError::unavailable("Inference queue is full")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    ApiError::unavailable("Inference worker stopped")
                }
            })?;

        rx.await
            .map_err(|_| ApiError::unavailable("Inference worker stopped"))?
    }

    /// Kick off the one-time model load in the background.
    pub async fn warmup(&self) {
        let _ = self.tx.send(InferenceJob::Warmup).await;
    }

    /// Release the model and stop the worker. Jobs already queued ahead of
    /// the shutdown are still answered.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(InferenceJob::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Long-lived task that pulls jobs off the channel one at a time.
async fn inference_worker(
    mut rx: mpsc::Receiver<InferenceJob>,
    model_state: SharedModelState,
    loader: BackendLoader,
) {
    let mut loader = Some(loader);
    let mut backend: Option<Box<dyn CaptionBackend>> = None;

    while let Some(job) = rx.recv().await {
        match job {
            InferenceJob::Warmup => {
                let _ = ensure_loaded(&mut loader, &mut backend, &model_state).await;
            }
            InferenceJob::Describe {
                image_path,
                respond_to,
            } => {
                if let Err(e) = ensure_loaded(&mut loader, &mut backend, &model_state).await {
                    let _ = respond_to.send(Err(e));
                    continue;
                }

                // Heavy work goes on the blocking thread pool. The backend
                // moves into the closure and comes back with the result.
                let mut active = backend.take().expect("backend present after ensure_loaded");
                let path = image_path.clone();
                let join_result = tokio::task::spawn_blocking(move || {
                    let result = active.describe(&path);
                    (active, result)
                })
                .await;

                let result = match join_result {
                    Ok((returned, result)) => {
                        backend = Some(returned);
                        result
                    }
                    Err(e) => {
                        // The backend died with the panicking thread; further
                        // requests fail until the process restarts.
                        log_error!("Inference task panicked: {}", e);
                        set_state(
                            &model_state,
                            ModelState::Failed(format!("inference task panicked: {e}")),
                        );
                        Err(ApiError::inference(format!("Inference task panicked: {e}")))
                    }
                };

                // Caller may have dropped the receiver (disconnected) — ignore error.
                let _ = respond_to.send(result);
            }
            InferenceJob::Shutdown { done } => {
                drop(backend.take());
                set_state(&model_state, ModelState::ShutDown);
                log_info!("Inference worker shut down, model released");
                let _ = done.send(());
                break;
            }
        }
    }
}

/// Run the one-time load if it has not happened yet.
///
/// The worker is the only caller, so a first-use race cannot double-load:
/// requests arriving during the load are simply behind it in the channel.
async fn ensure_loaded(
    loader: &mut Option<BackendLoader>,
    backend: &mut Option<Box<dyn CaptionBackend>>,
    model_state: &SharedModelState,
) -> Result<(), ApiError> {
    if backend.is_some() {
        return Ok(());
    }

    let Some(load) = loader.take() else {
        // The single load attempt already happened and did not survive.
        let message = match current_state(model_state) {
            ModelState::Failed(m) => m,
            ModelState::ShutDown => "model shut down".to_string(),
            _ => "model not loaded".to_string(),
        };
        return Err(ApiError::unavailable(message));
    };

    set_state(model_state, ModelState::Loading);
    log_info!("Loading vision-language model...");

    match tokio::task::spawn_blocking(load).await {
        Ok(Ok(loaded)) => {
            let device = loaded.device();
            set_state(model_state, ModelState::Ready(device));
            log_info!("Model loaded on {}", device);
            *backend = Some(loaded);
            Ok(())
        }
        Ok(Err(message)) => {
            log_error!("Model load failed: {}", message);
            set_state(model_state, ModelState::Failed(message.clone()));
            Err(ApiError::unavailable(format!(
                "Model failed to load: {message}"
            )))
        }
        Err(e) => {
            let message = format!("model load panicked: {e}");
            log_error!("{}", message);
            set_state(model_state, ModelState::Failed(message.clone()));
            Err(ApiError::unavailable(message))
        }
    }
}
