//! Letter classifier: checkpoint loading, preprocessing and inference.

use std::path::{Path, PathBuf};

use candle_core::pickle::PthTensors;
use candle_core::{D, DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use image::RgbImage;
use image::imageops::FilterType;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::network::GestureNet;
use crate::config::Provider;
use crate::config::tuning::Calibration;
use crate::error::{RecognitionError, Result};

/// Square input resolution the network was trained on.
pub const INPUT_SIZE: u32 = 256;

pub const NUM_CLASSES: usize = 36;

/// Class labels in output order: digits, then letters.
pub const CLASSES: [char; NUM_CLASSES] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Wrapper keys a training script may have nested the weights under, tried in
/// order before the bare mapping.
pub const CHECKPOINT_KEYS: [&str; 3] = ["model_state_dict", "model_state", "state_dict"];

/// A tensor every compatible checkpoint contains.
const HEAD_TENSOR: &str = "classifier.9.weight";

/// Index of a class label, case-insensitive.
pub fn class_index(label: char) -> Option<usize> {
    let label = label.to_ascii_uppercase();
    CLASSES.iter().position(|&c| c == label)
}

/// One frame's top-1 prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RawPrediction {
    pub label: char,
    /// Calibrated confidence.
    pub confidence: f32,
    /// Softmax probability before calibration.
    pub raw_confidence: f32,
}

/// Pick the top class from a probability vector and calibrate its confidence.
pub fn top_prediction(probs: &[f32], calibration: &Calibration) -> Option<RawPrediction> {
    if probs.len() != NUM_CLASSES {
        return None;
    }

    let mut best = (0usize, f32::MIN);
    let mut second = f32::MIN;
    for (idx, &p) in probs.iter().enumerate() {
        if p > best.1 {
            second = best.1;
            best = (idx, p);
        } else if p > second {
            second = p;
        }
    }

    let label = CLASSES[best.0];
    let confidence = calibration.adjust(label, best.1, second.max(0.0));
    Some(RawPrediction { label, confidence, raw_confidence: best.1 })
}

/// Anything that maps an image to a probability distribution over [`CLASSES`].
pub trait LetterClassifier: Send + Sync {
    /// Probabilities for the 36 classes, summing to 1.
    fn classify(&self, image: &RgbImage) -> Result<Vec<f32>>;

    /// Human-readable compute device.
    fn device_name(&self) -> String;
}

/// The trained attention CNN running on candle.
pub struct GestureClassifier {
    net: GestureNet,
    device: Device,
    provider: Provider,
    path: PathBuf,
}

impl GestureClassifier {
    /// Load a checkpoint onto the requested device.
    ///
    /// # Errors
    /// Returns an error if the file is missing or none of the known wrapper
    /// layouts contains tensors matching the network.
    pub fn load(path: &Path, provider: Provider) -> Result<Self> {
        if !path.exists() {
            return Err(RecognitionError::Checkpoint(format!("checkpoint not found: {}", path.display())));
        }

        let (device, provider) = select_device(provider);
        info!("Loading gesture classifier from {} on {}", path.display(), provider);

        let vb = open_checkpoint(path, &device)?;
        let net = GestureNet::new(vb, NUM_CLASSES).map_err(|e| RecognitionError::Checkpoint(format!("weights don't match the network: {}", e)))?;

        info!("✅ Gesture classifier ready ({} classes)", NUM_CLASSES);
        Ok(Self { net, device, provider, path: path.to_path_buf() })
    }

    /// Build from an already-resolved variable source.
    pub fn from_var_builder(vb: VarBuilder, device: Device) -> Result<Self> {
        let net = GestureNet::new(vb, NUM_CLASSES)?;
        Ok(Self { net, device, provider: Provider::Cpu, path: PathBuf::new() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resize to the training resolution and normalize with ImageNet statistics.
    fn preprocess(&self, image: &RgbImage) -> Result<Tensor> {
        let resized = image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        let mut data = vec![0f32; 3 * plane];

        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = (pixel[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }

        Ok(Tensor::from_vec(data, (1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize), &self.device)?)
    }
}

impl LetterClassifier for GestureClassifier {
    fn classify(&self, image: &RgbImage) -> Result<Vec<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(RecognitionError::InvalidFrame("empty classifier input".to_string()));
        }

        let input = self.preprocess(image)?;
        let logits = self.net.forward(&input)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?.squeeze(0)?.to_vec1::<f32>()?;
        Ok(probs)
    }

    fn device_name(&self) -> String {
        self.provider.to_string()
    }
}

/// Resolve the candle device for a provider, falling back to CPU when the
/// backend is missing from this build or the device can't be opened.
pub fn select_device(provider: Provider) -> (Device, Provider) {
    let device = match provider {
        Provider::Cpu => return (Device::Cpu, Provider::Cpu),
        Provider::Cuda => Device::new_cuda(0),
        Provider::Metal => Device::new_metal(0),
    };

    match device {
        Ok(device) => (device, provider),
        Err(e) => {
            warn!("{} provider unavailable ({}), falling back to CPU", provider, e);
            (Device::Cpu, Provider::Cpu)
        }
    }
}

/// Open a checkpoint and scope the variable builder to wherever the weights live.
fn open_checkpoint(path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let is_safetensors = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("safetensors"));

    if is_safetensors {
        // SAFETY: the file is not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device) }.map_err(|e| RecognitionError::Checkpoint(e.to_string()))?;

        for key in CHECKPOINT_KEYS {
            if vb.contains_tensor(&format!("{}.{}", key, HEAD_TENSOR)) {
                debug!("Checkpoint weights found under '{}'", key);
                return Ok(vb.pp(key));
            }
        }
        if vb.contains_tensor(HEAD_TENSOR) {
            return Ok(vb);
        }
    } else {
        let keys = CHECKPOINT_KEYS.iter().copied().map(Some).chain(std::iter::once(None));
        for key in keys {
            match PthTensors::new(path, key) {
                Ok(tensors) if tensors.tensor_infos().contains_key(HEAD_TENSOR) => {
                    debug!("Checkpoint weights found under {:?}", key.unwrap_or("<root>"));
                    return Ok(VarBuilder::from_backend(Box::new(tensors), DType::F32, device.clone()));
                }
                Ok(_) => debug!("No classifier weights under {:?}", key.unwrap_or("<root>")),
                Err(e) => debug!("Checkpoint layout {:?} not readable: {}", key.unwrap_or("<root>"), e),
            }
        }
    }

    Err(RecognitionError::Checkpoint(format!(
        "no classifier weights in {} (tried {}, and the bare mapping)",
        path.display(),
        CHECKPOINT_KEYS.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;
    use image::Rgb;

    #[test]
    fn test_classify_returns_distribution() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let classifier = GestureClassifier::from_var_builder(vb, Device::Cpu).unwrap();

        let image = RgbImage::from_fn(120, 90, |x, y| Rgb([(x * 2) as u8, (y * 2) as u8, 128]));
        let probs = classifier.classify(&image).unwrap();
        assert_eq!(probs.len(), NUM_CLASSES);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "sum was {}", sum);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_missing_checkpoint_is_reported() {
        let result = GestureClassifier::load(Path::new("/nonexistent/best.pth"), Provider::Cpu);
        assert!(matches!(result, Err(RecognitionError::Checkpoint(_))));
    }

    #[test]
    fn test_top_prediction_picks_argmax() {
        let mut probs = vec![0.01f32; NUM_CLASSES];
        probs[class_index('H').unwrap()] = 0.6;
        probs[class_index('5').unwrap()] = 0.05;
        let pred = top_prediction(&probs, &Calibration::default()).unwrap();
        assert_eq!(pred.label, 'H');
        assert_eq!(pred.raw_confidence, 0.6);
        assert!((pred.confidence - 0.66).abs() < 1e-5);
    }

    #[test]
    fn test_top_prediction_rejects_wrong_length() {
        assert!(top_prediction(&[0.5, 0.5], &Calibration::default()).is_none());
    }

    #[test]
    fn test_class_index() {
        assert_eq!(class_index('0'), Some(0));
        assert_eq!(class_index('a'), Some(10));
        assert_eq!(class_index('Z'), Some(35));
        assert_eq!(class_index('?'), None);
    }
}
