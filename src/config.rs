//! Pipeline Configuration Module
//!
//! Every knob of the two-stage run. The defaults are the Kaggle kernel
//! setup: dataset roots under `../input`, EfficientNet-B3
//! at 300px, 15 one-cycle epochs at 5e-4 on the auxiliary data, no stage-2
//! fitting, 8-pass TTA at 1.35 zoom blended 0.4/0.6, fixed thresholds.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::AugmentationConfig;
use crate::grading::DEFAULT_COEFFICIENTS;
use crate::inference::{DEFAULT_BLEND_WEIGHT, DEFAULT_TTA_SCALE};
use crate::utils::available_workers;
use crate::utils::error::{GradingError, Result};
use crate::utils::seed::DEFAULT_SEED;
use crate::IMAGE_SIZE;

/// Input data locations and loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Competition data (`train.csv`, `sample_submission.csv`, image folders)
    pub primary_root: PathBuf,
    /// Auxiliary pre-training data (`trainLabels_cropped.csv`)
    pub auxiliary_root: PathBuf,
    pub image_size: usize,
    pub batch_size: usize,
    /// Data loader workers; 0 means one per host core
    pub num_workers: usize,
    /// Held-out fraction of the primary training table
    pub valid_fraction: f64,
    pub augmentation: AugmentationConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            primary_root: PathBuf::from("../input/aptos2019-blindness-detection"),
            auxiliary_root: PathBuf::from("../input/diabetic-retinopathy-resized"),
            image_size: IMAGE_SIZE,
            batch_size: 32,
            num_workers: 0,
            valid_fraction: 0.2,
            augmentation: AugmentationConfig::default(),
        }
    }
}

impl DataConfig {
    /// Worker count with 0 resolved to the host core count
    pub fn workers(&self) -> usize {
        if self.num_workers == 0 {
            available_workers()
        } else {
            self.num_workers
        }
    }
}

/// Backbone selection and artifact locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Registry name, `efficientnet-b0` .. `efficientnet-b3`
    pub variant: String,
    /// Directory holding the pretrained `.pth` checkpoints
    pub weights_dir: PathBuf,
    /// Parent of the per-stage checkpoint directories
    pub model_root: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: "efficientnet-b3".to_string(),
            weights_dir: PathBuf::from("../input/efficientnet-pytorch"),
            model_root: PathBuf::from(".."),
        }
    }
}

/// One training stage
///
/// `epochs` and `model_dir` are required whenever a stage is spelled out in
/// a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub epochs: usize,
    #[serde(default = "default_max_lr")]
    pub max_lr: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f32,
    /// Checkpoint directory name under `model.model_root`
    pub model_dir: String,
}

fn default_max_lr() -> f64 {
    5e-4
}

fn default_weight_decay() -> f32 {
    0.01
}

impl StageConfig {
    pub fn stage_one() -> Self {
        Self {
            epochs: 15,
            max_lr: default_max_lr(),
            weight_decay: default_weight_decay(),
            model_dir: "old_weights".to_string(),
        }
    }

    pub fn stage_two() -> Self {
        Self {
            epochs: 0,
            max_lr: default_max_lr(),
            weight_decay: default_weight_decay(),
            model_dir: "weights".to_string(),
        }
    }

    pub fn checkpoint_dir(&self, model_root: &Path) -> PathBuf {
        model_root.join(&self.model_dir)
    }
}

/// Test-set scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub tta_scale: f32,
    /// Weight of the plain prediction in the final blend
    pub blend_weight: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            tta_scale: DEFAULT_TTA_SCALE,
            blend_weight: DEFAULT_BLEND_WEIGHT,
        }
    }
}

/// Score-to-grade thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundingConfig {
    pub coefficients: [f32; 4],
    /// Tune thresholds on stage-2 validation scores
    pub optimize: bool,
}

impl Default for RoundingConfig {
    fn default() -> Self {
        Self {
            coefficients: DEFAULT_COEFFICIENTS,
            optimize: false,
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub seed: u64,
    pub data: DataConfig,
    pub model: ModelConfig,
    pub stage_one: StageConfig,
    pub stage_two: StageConfig,
    pub inference: InferenceConfig,
    pub rounding: RoundingConfig,
    pub output_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            data: DataConfig::default(),
            model: ModelConfig::default(),
            stage_one: StageConfig::stage_one(),
            stage_two: StageConfig::stage_two(),
            inference: InferenceConfig::default(),
            rounding: RoundingConfig::default(),
            output_path: PathBuf::from("submission.csv"),
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.data.image_size == 0 {
            return Err("image_size must be greater than 0".to_string());
        }
        if self.data.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }
        if !(0.0..1.0).contains(&self.data.valid_fraction) {
            return Err("valid_fraction must be in range [0.0, 1.0)".to_string());
        }
        self.data.augmentation.validate()?;

        for (name, stage) in [("stage_one", &self.stage_one), ("stage_two", &self.stage_two)] {
            if stage.epochs > 0 && stage.max_lr <= 0.0 {
                return Err(format!("{}.max_lr must be positive", name));
            }
            if stage.model_dir.is_empty() {
                return Err(format!("{}.model_dir must not be empty", name));
            }
        }

        if self.inference.tta_scale < 1.0 {
            return Err("tta_scale must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.inference.blend_weight) {
            return Err("blend_weight must be in range [0.0, 1.0]".to_string());
        }
        if !self.rounding.coefficients.windows(2).all(|w| w[0] <= w[1]) {
            return Err("rounding coefficients must be non-decreasing".to_string());
        }

        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file; absent fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GradingError::PathNotFound(
                path.to_path_buf(),
                "configuration file".to_string(),
            ));
        }
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate().map_err(GradingError::Config)?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
