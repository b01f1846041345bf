// Model lifecycle state shared between the inference worker and handlers

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::captioner::{CaptionBackend, ComputeDevice, OrtCaptioner};
use super::models::ModelStatusResponse;

/// Where the model currently is in its lifecycle.
///
/// Written only by the inference worker; handlers read it to fail fast
/// with 503 instead of queueing work that cannot succeed. Loading is
/// attempted at most once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    NotLoaded,
    Loading,
    Ready(ComputeDevice),
    Failed(String),
    ShutDown,
}

pub type SharedModelState = Arc<Mutex<ModelState>>;

pub fn new_shared_state() -> SharedModelState {
    Arc::new(Mutex::new(ModelState::NotLoaded))
}

pub fn current_state(state: &SharedModelState) -> ModelState {
    state.lock().unwrap_or_else(|p| p.into_inner()).clone()
}

pub fn set_state(state: &SharedModelState, value: ModelState) {
    *state.lock().unwrap_or_else(|p| p.into_inner()) = value;
}

/// True when inference requests are pointless: the one load attempt
/// already failed, or the model was torn down.
pub fn is_terminally_unavailable(state: &SharedModelState) -> bool {
    matches!(
        current_state(state),
        ModelState::Failed(_) | ModelState::ShutDown
    )
}

/// Loader the worker invokes on first use.
pub type BackendLoader = Box<dyn FnOnce() -> Result<Box<dyn CaptionBackend>, String> + Send>;

/// The production loader: ONNX sessions + tokenizer from `model_dir`.
pub fn ort_loader(model_dir: PathBuf) -> BackendLoader {
    Box::new(move || {
        OrtCaptioner::load(&model_dir)
            .map(|captioner| Box::new(captioner) as Box<dyn CaptionBackend>)
            .map_err(|e| format!("{e:#}"))
    })
}

/// Snapshot for the model status endpoint.
pub fn get_model_status(state: &SharedModelState, model_dir: &Path) -> ModelStatusResponse {
    let (loaded, device, error) = match current_state(state) {
        ModelState::Ready(device) => (true, Some(device.to_string()), None),
        ModelState::Failed(message) => (false, None, Some(message)),
        ModelState::ShutDown => (false, None, Some("model shut down".to_string())),
        ModelState::NotLoaded | ModelState::Loading => (false, None, None),
    };
    ModelStatusResponse {
        loaded,
        device,
        model_dir: model_dir.display().to_string(),
        error,
    }
}
