// ONNX-backed vision-language captioning: one image in, one description out

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use ndarray::{s, Array2, Array4, ArrayD, Ix3};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;
use tokenizers::Tokenizer;

#[cfg(feature = "cuda")]
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

use super::error::ApiError;
use crate::log_warn;

/// Compute device the model sessions were placed on. Fixed at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    Cuda,
    Cpu,
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cuda => f.write_str("cuda:0"),
            ComputeDevice::Cpu => f.write_str("cpu"),
        }
    }
}

/// The inference capability behind the queue worker.
///
/// The worker owns exactly one backend; handing it a fake implementation
/// is how tests drive the pipelines without model files.
pub trait CaptionBackend: Send {
    fn describe(&mut self, image_path: &Path) -> Result<String, ApiError>;
    fn device(&self) -> ComputeDevice;
}

// Input size expected by the vision encoder
const IMAGE_SIZE: u32 = 384;
// Normalization applied before the encoder
const PIXEL_MEAN: f32 = 0.5;
const PIXEL_STD: f32 = 0.5;
// Generation starts from <s> and stops at </s> or the token cap
const MAX_DESCRIPTION_TOKENS: usize = 64;
const DECODER_START_TOKEN_ID: i64 = 1;
const EOS_TOKEN_ID: i64 = 2;

pub const ENCODER_FILE: &str = "encoder_model.onnx";
pub const DECODER_FILE: &str = "decoder_model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Vision encoder + autoregressive text decoder pair driven through
/// ONNX Runtime, with greedy decoding.
pub struct OrtCaptioner {
    encoder: Session,
    decoder: Session,
    tokenizer: Tokenizer,
    device: ComputeDevice,
}

impl OrtCaptioner {
    /// Load the encoder/decoder sessions and tokenizer from `model_dir`.
    ///
    /// Probes for a CUDA execution provider first; falls back to CPU when
    /// the provider is unavailable or session creation fails on it. Both
    /// sessions always end up on the same device.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let encoder_path = model_dir.join(ENCODER_FILE);
        let decoder_path = model_dir.join(DECODER_FILE);
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);
        for path in [&encoder_path, &decoder_path, &tokenizer_path] {
            if !path.exists() {
                return Err(anyhow!("Model file missing: {}", path.display()));
            }
        }

        let (encoder, decoder, device) =
            match Self::build_sessions(&encoder_path, &decoder_path, true) {
                Ok(built) => built,
                Err(e) => {
                    log_warn!("Model load failed ({}); retrying on CPU", e);
                    Self::build_sessions(&encoder_path, &decoder_path, false)?
                }
            };

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {e}"))?;

        Ok(OrtCaptioner {
            encoder,
            decoder,
            tokenizer,
            device,
        })
    }

    fn build_sessions(
        encoder_path: &Path,
        decoder_path: &Path,
        try_cuda: bool,
    ) -> Result<(Session, Session, ComputeDevice)> {
        let (encoder, device) = Self::build_session(encoder_path, try_cuda)?;
        let (decoder, _) = Self::build_session(decoder_path, device == ComputeDevice::Cuda)?;
        Ok((encoder, decoder, device))
    }

    fn build_session(model_path: &Path, try_cuda: bool) -> Result<(Session, ComputeDevice)> {
        let mut builder = SessionBuilder::new()?;
        let device = if try_cuda {
            probe_cuda(&mut builder)?
        } else {
            ComputeDevice::Cpu
        };

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(
                model_path
                    .to_str()
                    .ok_or_else(|| anyhow!("Non-UTF8 model path"))?,
            )?;

        Ok((session, device))
    }

    fn describe_inner(&mut self, image_path: &Path) -> Result<String> {
        let image = image::open(image_path)
            .with_context(|| format!("Failed to decode image {}", image_path.display()))?;

        let pixels = preprocess(&image);
        let encoder_states = self.encode(pixels)?;
        let token_ids = self.generate(&encoder_states)?;

        let text = self
            .tokenizer
            .decode(&token_ids, true)
            .map_err(|e| anyhow!("Failed to decode tokens: {e}"))?;

        Ok(text.trim().to_string())
    }

    fn encode(&self, pixels: Array4<f32>) -> Result<ArrayD<f32>> {
        let tensor = Value::from_array(pixels.into_dyn())?;
        let mut inputs: HashMap<&str, Value> = HashMap::new();
        inputs.insert("pixel_values", tensor.into());

        let outputs = self.encoder.run(inputs)?;
        let values: Vec<Value> = outputs.into_iter().map(|(_, v)| v).collect();
        let hidden = values
            .first()
            .ok_or_else(|| anyhow!("Encoder returned no outputs"))?
            .try_extract_tensor::<f32>()?
            .to_owned();
        Ok(hidden)
    }

    /// Greedy autoregressive decode against the encoder output.
    fn generate(&self, encoder_states: &ArrayD<f32>) -> Result<Vec<u32>> {
        let mut input_ids: Vec<i64> = vec![DECODER_START_TOKEN_ID];
        let mut generated: Vec<u32> = Vec::new();

        for _ in 0..MAX_DESCRIPTION_TOKENS {
            let ids = Array2::from_shape_vec((1, input_ids.len()), input_ids.clone())?;
            let mut inputs: HashMap<&str, Value> = HashMap::new();
            inputs.insert("input_ids", Value::from_array(ids.into_dyn())?.into());
            inputs.insert(
                "encoder_hidden_states",
                Value::from_array(encoder_states.clone())?.into(),
            );

            let outputs = self.decoder.run(inputs)?;
            let values: Vec<Value> = outputs.into_iter().map(|(_, v)| v).collect();
            let logits = values
                .first()
                .ok_or_else(|| anyhow!("Decoder returned no outputs"))?
                .try_extract_tensor::<f32>()?;
            let logits = logits
                .into_dimensionality::<Ix3>()
                .map_err(|e| anyhow!("Unexpected logits shape: {e}"))?;

            let steps = logits.shape()[1];
            let last = logits.slice(s![0, steps - 1, ..]);
            let next = last
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i as i64)
                .unwrap_or(EOS_TOKEN_ID);

            if next == EOS_TOKEN_ID {
                break;
            }
            generated.push(next as u32);
            input_ids.push(next);
        }

        Ok(generated)
    }
}

impl CaptionBackend for OrtCaptioner {
    fn describe(&mut self, image_path: &Path) -> Result<String, ApiError> {
        self.describe_inner(image_path)
            .map_err(|e| ApiError::inference(format!("{e:#}")))
    }

    fn device(&self) -> ComputeDevice {
        self.device
    }
}

/// Register the CUDA execution provider when it is actually usable.
#[cfg(feature = "cuda")]
fn probe_cuda(builder: &mut SessionBuilder) -> Result<ComputeDevice> {
    let cuda_ep = CUDAExecutionProvider::default();
    match cuda_ep.is_available() {
        Ok(true) => {
            cuda_ep.register(builder)?;
            Ok(ComputeDevice::Cuda)
        }
        _ => {
            log_warn!("CUDA provider not available; falling back to CPU");
            Ok(ComputeDevice::Cpu)
        }
    }
}

#[cfg(not(feature = "cuda"))]
fn probe_cuda(_builder: &mut SessionBuilder) -> Result<ComputeDevice> {
    Ok(ComputeDevice::Cpu)
}

/// Resize to the encoder's input size and normalize to NCHW float32.
fn preprocess(image: &image::DynamicImage) -> Array4<f32> {
    let resized = image
        .resize_exact(IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle)
        .to_rgb8();

    let size = IMAGE_SIZE as usize;
    let mut pixels = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            pixels[[0, c, y as usize, x as usize]] =
                (pixel.0[c] as f32 / 255.0 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape_and_range() {
        let image = image::DynamicImage::new_rgb8(64, 48);
        let pixels = preprocess(&image);
        assert_eq!(pixels.shape(), &[1, 3, 384, 384]);
        // Black input normalizes to -1.0 everywhere
        assert!(pixels.iter().all(|&v| (v + 1.0).abs() < f32::EPSILON));
    }

    #[test]
    fn test_preprocess_white_pixel() {
        let mut buffer = image::RgbImage::new(8, 8);
        for pixel in buffer.pixels_mut() {
            *pixel = image::Rgb([255, 255, 255]);
        }
        let pixels = preprocess(&image::DynamicImage::ImageRgb8(buffer));
        assert!(pixels.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_device_display() {
        assert_eq!(ComputeDevice::Cuda.to_string(), "cuda:0");
        assert_eq!(ComputeDevice::Cpu.to_string(), "cpu");
    }
}
