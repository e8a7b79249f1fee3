//! The two fine-tuning stages
//!
//! Stage 1 trains on the auxiliary data with the regression head frozen and
//! no validation split. Stage 2 unfreezes the head and continues on the
//! competition data with an 80/20 split.

use anyhow::{Context, Result};
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use tracing::{info, warn};

use super::checkpoint::{save_stage, StageMetadata};
use super::trainer::{fit_one_cycle, EpochRecord, FitSettings};
use crate::config::{PipelineConfig, StageConfig};
use crate::dataset::{SampleRecord, TrainValidSplit};
use crate::inference::Predictor;
use crate::model::{set_head_trainable, EfficientNet};
use crate::utils::metrics::RegressionMetrics;
use crate::utils::seed::SeedState;

pub const STAGE_ONE: &str = "stage-1";
pub const STAGE_TWO: &str = "stage-2";

/// Result of the auxiliary pre-training stage
pub struct StageOneOutcome<B: AutodiffBackend> {
    pub model: EfficientNet<B>,
    pub history: Vec<EpochRecord>,
}

/// Result of the competition fine-tuning stage
pub struct StageTwoOutcome<B: AutodiffBackend> {
    pub model: EfficientNet<B>,
    pub history: Vec<EpochRecord>,
    /// Scores of the validation split, in split order
    pub valid_predictions: Vec<f32>,
    pub valid_labels: Vec<f32>,
    pub valid_metrics: RegressionMetrics,
}

fn fit_settings(config: &PipelineConfig, stage: &StageConfig, seed: u64) -> FitSettings {
    FitSettings {
        epochs: stage.epochs,
        max_lr: stage.max_lr,
        batch_size: config.data.batch_size,
        num_workers: config.data.workers(),
        image_size: config.data.image_size,
        augmentation: config.data.augmentation.clone(),
        seed,
        weight_decay: stage.weight_decay,
    }
}

/// Train on the auxiliary samples with the head frozen
pub fn run_stage_one<B: AutodiffBackend>(
    model: EfficientNet<B>,
    samples: &[SampleRecord],
    config: &PipelineConfig,
    seeds: &mut SeedState,
    device: &B::Device,
) -> Result<StageOneOutcome<B>> {
    let stage = &config.stage_one;
    println!("{}", "Stage 1: auxiliary pre-training".green().bold());
    info!(
        "[{}] {} samples, {} epochs, max_lr {:.1e}, head frozen",
        STAGE_ONE,
        samples.len(),
        stage.epochs,
        stage.max_lr
    );

    let model = set_head_trainable(model, false);
    let settings = fit_settings(config, stage, seeds.derive(STAGE_ONE));

    let outcome = fit_one_cycle(model, samples, None, &settings, STAGE_ONE, device)
        .context("stage 1 training failed")?;

    let mut metadata = StageMetadata::new(
        STAGE_ONE,
        &config.model.variant,
        stage.epochs,
        stage.max_lr,
        settings.seed,
    );
    metadata.training_samples = samples.len();
    metadata.history = outcome.history.clone();

    let dir = stage.checkpoint_dir(&config.model.model_root);
    save_stage(&outcome.model, &dir, &metadata).context("failed to save stage 1 checkpoint")?;

    Ok(StageOneOutcome {
        model: outcome.model,
        history: outcome.history,
    })
}

/// Unfreeze the head, fine-tune on the split and score its validation part
pub fn run_stage_two<B: AutodiffBackend>(
    model: EfficientNet<B>,
    split: &TrainValidSplit<SampleRecord>,
    config: &PipelineConfig,
    seeds: &mut SeedState,
    device: &B::Device,
) -> Result<StageTwoOutcome<B>> {
    let stage = &config.stage_two;
    println!("{}", "Stage 2: competition fine-tuning".green().bold());
    info!(
        "[{}] {} training / {} validation samples, {} epochs",
        STAGE_TWO,
        split.train.len(),
        split.valid.len(),
        stage.epochs
    );
    if stage.epochs == 0 {
        warn!(
            "[{}] stage_two.epochs is 0: the stage-1 weights are used for prediction as they are",
            STAGE_TWO
        );
    }

    let model = set_head_trainable(model, true);
    let settings = fit_settings(config, stage, seeds.derive(STAGE_TWO));

    let outcome = fit_one_cycle(
        model,
        &split.train,
        Some(&split.valid),
        &settings,
        STAGE_TWO,
        device,
    )
    .context("stage 2 training failed")?;

    let predictor = Predictor::new(config.data.batch_size, config.data.image_size);
    let valid_predictions = predictor
        .predict(&outcome.model.valid(), &split.valid, device)
        .context("failed to score the validation split")?;
    let valid_labels: Vec<f32> = split.valid.iter().map(|s| s.label).collect();
    let valid_metrics = RegressionMetrics::from_scores(&valid_predictions, &valid_labels);

    info!(
        "[{}] validation: {} samples, MSE {:.4}, kappa {:.4}",
        STAGE_TWO, valid_metrics.samples, valid_metrics.mse, valid_metrics.kappa
    );

    let mut metadata = StageMetadata::new(
        STAGE_TWO,
        &config.model.variant,
        stage.epochs,
        stage.max_lr,
        settings.seed,
    );
    metadata.training_samples = split.train.len();
    metadata.validation_samples = split.valid.len();
    metadata.history = outcome.history.clone();
    metadata.validation = Some(valid_metrics);

    let dir = stage.checkpoint_dir(&config.model.model_root);
    save_stage(&outcome.model, &dir, &metadata).context("failed to save stage 2 checkpoint")?;

    Ok(StageTwoOutcome {
        model: outcome.model,
        history: outcome.history,
        valid_predictions,
        valid_labels,
        valid_metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, TrainingBackend};
    use crate::model::{head_is_trainable, with_regression_head, EfficientNetConfig};
    use crate::training::checkpoint::{StageMetadata, METADATA_FILE};
    use image::{Rgb, RgbImage};

    fn test_config(root: &std::path::Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.data.image_size = 32;
        config.data.batch_size = 2;
        config.data.num_workers = 1;
        config.model.model_root = root.to_path_buf();
        config.model.variant = "efficientnet-b0".to_string();
        config.stage_one.epochs = 0;
        config
    }

    #[test]
    fn test_stage_one_freezes_head_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let device = default_device();
        let model = with_regression_head(EfficientNetConfig::b0().init::<TrainingBackend>(&device));

        let outcome = run_stage_one(model, &[], &config, &mut SeedState::new(43), &device).unwrap();

        assert!(!head_is_trainable(&outcome.model));
        assert!(dir.path().join("old_weights").join(METADATA_FILE).exists());
    }

    #[test]
    fn test_stage_two_without_epochs_still_validates() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let device = default_device();
        let model = with_regression_head(EfficientNetConfig::b0().init::<TrainingBackend>(&device));

        let samples: Vec<SampleRecord> = (0..5)
            .map(|i| {
                let path = dir.path().join(format!("{}.png", i));
                RgbImage::from_pixel(36, 36, Rgb([60, (i * 40) as u8, 20])).save(&path).unwrap();
                SampleRecord::new(path, (i % 5) as f32)
            })
            .collect();
        let split = TrainValidSplit {
            train: samples[..3].to_vec(),
            valid: samples[3..].to_vec(),
        };

        let outcome = run_stage_two(model, &split, &config, &mut SeedState::new(43), &device).unwrap();

        assert!(head_is_trainable(&outcome.model));
        assert!(outcome.history.is_empty());
        assert_eq!(outcome.valid_predictions.len(), 2);
        assert_eq!(outcome.valid_labels, vec![3.0, 4.0]);

        let metadata = StageMetadata::load(&dir.path().join("weights")).unwrap();
        assert_eq!(metadata.validation_samples, 2);
        assert_eq!(metadata.validation.map(|v| v.samples), Some(2));
    }
}
