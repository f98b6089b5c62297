use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

const DEFAULT_MODEL_PATH: &str = "models/model_mobilenetv2_classifier.tflite";

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Deployment knobs for the prediction service. Loaded once at startup from
/// an optional YAML file plus environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    pub max_upload_bytes: usize,
    /// Root for request-scoped scratch directories. `None` uses the system
    /// temp dir.
    pub scratch_dir: Option<PathBuf>,
    pub preprocess: PreprocessConfig,
}

/// Constants of the enhancement chain. These match the values the model was
/// trained against; changing them silently changes model behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub target_width: u32,
    pub target_height: u32,
    pub brightness_delta: f32,
    pub contrast_factor: f32,
    pub saturation_boost: f32,
    pub clahe_clip_limit: f32,
    pub clahe_grid_size: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_width: 224,
            target_height: 224,
            brightness_delta: 0.1,
            contrast_factor: 1.3,
            saturation_boost: 1.2,
            clahe_clip_limit: 0.01,
            clahe_grid_size: 8,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            scratch_dir: None,
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl ClassifierConfig {
    /// Reads `CLASSIFIER_CONFIG` (a YAML file) if set, then applies
    /// `VEGETABLE_MODEL_PATH` and `MAX_UPLOAD_BYTES` overrides.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = match env::var("CLASSIFIER_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)?;
                serde_yaml::from_str(&raw)?
            }
            Err(_) => Self::default(),
        };
        if let Ok(path) = env::var("VEGETABLE_MODEL_PATH") {
            config.model_path = PathBuf::from(path);
        }
        if let Ok(max) = env::var("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = max.parse()?;
        }
        Ok(config)
    }
}
