//! Stage checkpoints
//!
//! Each stage directory holds the model record (`model.mpk`, Burn's compact
//! recorder) and a `stage.json` with the settings and epoch history.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::trainer::EpochRecord;
use crate::model::EfficientNet;
use crate::utils::error::{GradingError, Result};
use crate::utils::metrics::RegressionMetrics;

pub const MODEL_FILE_STEM: &str = "model";
pub const METADATA_FILE: &str = "stage.json";

/// Metadata written next to a stage's model record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMetadata {
    pub stage: String,
    pub variant: String,
    pub epochs: usize,
    pub max_lr: f64,
    pub training_samples: usize,
    pub validation_samples: usize,
    pub history: Vec<EpochRecord>,
    pub validation: Option<RegressionMetrics>,
    pub backend: String,
    pub seed: u64,
    pub timestamp: String,
}

impl StageMetadata {
    pub fn new(stage: &str, variant: &str, epochs: usize, max_lr: f64, seed: u64) -> Self {
        use chrono::Utc;

        Self {
            stage: stage.to_string(),
            variant: variant.to_string(),
            epochs,
            max_lr,
            training_samples: 0,
            validation_samples: 0,
            history: Vec::new(),
            validation: None,
            backend: crate::backend::backend_name().to_string(),
            seed,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Save metadata into `dir`
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(METADATA_FILE);

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| GradingError::Serialization(format!("Failed to serialize stage metadata: {}", e)))?;
        fs::write(&path, json)?;

        Ok(path)
    }

    /// Load metadata from `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let json = fs::read_to_string(dir.join(METADATA_FILE))?;
        let metadata = serde_json::from_str(&json)
            .map_err(|e| GradingError::Serialization(format!("Failed to deserialize stage metadata: {}", e)))?;
        Ok(metadata)
    }
}

/// Write the model record and metadata of one stage into `dir`
pub fn save_stage<B: Backend>(model: &EfficientNet<B>, dir: &Path, metadata: &StageMetadata) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let model_path = dir.join(MODEL_FILE_STEM);

    model
        .clone()
        .save_file(&model_path, &CompactRecorder::new())
        .map_err(|e| GradingError::Model(format!("Failed to save model to {:?}: {:?}", model_path, e)))?;
    metadata.save(dir)?;

    info!("Checkpoint saved to {:?}", dir);
    Ok(model_path)
}
