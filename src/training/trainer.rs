//! One-cycle training loop
//!
//! A custom loop over Burn's data loader rather than the high-level learner:
//! MSE on the single regression output, AdamW stepped with a one-cycle
//! learning rate indexed by samples seen, and quadratic weighted kappa
//! tracked per epoch.

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction},
    optim::{AdamWConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::scheduler::OneCycleScheduler;
use crate::dataset::{AugmentationConfig, AugmentingBatcher, FundusDataset, SampleRecord};
use crate::inference::predictor::{scores_from_output, Predictor};
use crate::model::EfficientNet;
use crate::utils::error::GradingError;
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::RegressionMetrics;

/// Hyper-parameters of one `fit_one_cycle` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSettings {
    pub epochs: usize,
    pub max_lr: f64,
    pub batch_size: usize,
    pub num_workers: usize,
    pub image_size: usize,
    pub augmentation: AugmentationConfig,
    pub seed: u64,
    pub weight_decay: f32,
}

/// Metrics of one finished epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_kappa: f64,
    pub valid: Option<RegressionMetrics>,
    /// Learning rate of the epoch's last optimizer step
    pub last_lr: f64,
    /// Training samples seen since the start of the fit
    pub samples_seen: usize,
}

impl EpochRecord {
    /// Validation kappa when a validation set exists, training kappa otherwise
    pub fn kappa(&self) -> f64 {
        self.valid.map_or(self.train_kappa, |v| v.kappa)
    }
}

/// Trained model plus per-epoch history
pub struct FitOutcome<B: AutodiffBackend> {
    pub model: EfficientNet<B>,
    pub history: Vec<EpochRecord>,
}

/// Train `model` on `train` for `settings.epochs` epochs
///
/// When `valid` is given it is scored in order after every epoch.
pub fn fit_one_cycle<B: AutodiffBackend>(
    model: EfficientNet<B>,
    train: &[SampleRecord],
    valid: Option<&[SampleRecord]>,
    settings: &FitSettings,
    stage: &str,
    device: &B::Device,
) -> Result<FitOutcome<B>> {
    let mut model = model;
    let mut history = Vec::with_capacity(settings.epochs);

    if settings.epochs == 0 || train.is_empty() {
        return Ok(FitOutcome { model, history });
    }

    let batcher = AugmentingBatcher::new(
        settings.augmentation.clone(),
        settings.image_size,
        settings.seed,
    );
    let dataset = FundusDataset::new(train.to_vec());
    info!("[{}] training grades 0-4: {:?}", stage, dataset.grade_distribution());
    let loader = DataLoaderBuilder::new(batcher)
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .num_workers(settings.num_workers)
        .set_device(device.clone())
        .build(dataset);

    // Each loader worker ends on its own partial batch; schedule by samples seen
    let scheduler = OneCycleScheduler::new(settings.max_lr, settings.epochs, train.len());
    info!("[{}] {}", stage, scheduler.description());

    let mut optimizer = AdamWConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.99)
        .with_weight_decay(settings.weight_decay)
        .init();
    let loss_fn = MseLoss::new();

    let predictor = Predictor::new(settings.batch_size, settings.image_size);
    let mut logger = TrainingLogger::new(stage, settings.epochs);
    let mut samples_seen = 0usize;

    for epoch in 0..settings.epochs {
        logger.start_epoch(epoch);
        println!(
            "{}",
            format!("[{}] Epoch {}/{}", stage, epoch + 1, settings.epochs)
                .yellow()
                .bold()
        );

        let pb = ProgressBar::new(train.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .context("invalid progress bar template")?
                .progress_chars("#>-"),
        );

        let mut epoch_loss = 0.0f64;
        let mut batches = 0usize;
        let mut scores = Vec::with_capacity(train.len());
        let mut labels = Vec::with_capacity(train.len());
        let mut lr = scheduler.lr_at(samples_seen);

        for batch in loader.iter() {
            let batch = batch.map_err(GradingError::from)?;
            let batch_len = batch.targets.dims()[0];
            lr = scheduler.lr_at(samples_seen);

            let output = model.forward(batch.images);
            let loss = loss_fn.forward(output.clone(), batch.targets.clone(), Reduction::Mean);

            let loss_value: f64 = loss.clone().into_scalar().elem();
            epoch_loss += loss_value;
            batches += 1;

            scores.extend(scores_from_output(output.detach())?);
            labels.extend(scores_from_output(batch.targets)?);

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(lr, model, grads);

            samples_seen += batch_len;
            pb.set_message(format!("loss {:.4}", loss_value));
            pb.inc(batch_len as u64);
        }
        pb.finish_and_clear();

        let train_loss = epoch_loss / batches.max(1) as f64;
        let train_metrics = RegressionMetrics::from_scores(&scores, &labels);
        debug!(
            "[{}] epoch {} saw {} training samples",
            stage,
            epoch + 1,
            train_metrics.samples
        );

        let valid_metrics = match valid {
            Some(samples) if !samples.is_empty() => {
                let valid_model = model.valid();
                let predictions = predictor.predict(&valid_model, samples, device)?;
                let targets: Vec<f32> = samples.iter().map(|s| s.label).collect();
                Some(RegressionMetrics::from_scores(&predictions, &targets))
            }
            _ => None,
        };

        let record = EpochRecord {
            epoch,
            train_loss,
            train_kappa: train_metrics.kappa,
            valid: valid_metrics,
            last_lr: lr,
            samples_seen,
        };

        logger.end_epoch(train_loss, record.kappa(), lr);
        match &record.valid {
            Some(v) => println!(
                "  {} Loss: {:.4} | Valid MSE: {:.4} | Valid Kappa: {:.4}",
                "→".cyan(),
                train_loss,
                v.mse,
                v.kappa
            ),
            None => println!(
                "  {} Loss: {:.4} | Train Kappa: {:.4}",
                "→".cyan(),
                train_loss,
                record.train_kappa
            ),
        }

        history.push(record);
    }

    if let Some(last) = history.last() {
        logger.log_complete(last.train_loss, last.kappa());
    }

    Ok(FitOutcome { model, history })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, TrainingBackend};
    use crate::model::{set_head_trainable, with_regression_head, EfficientNetConfig};
    use burn::module::Module;
    use burn::tensor::Tensor;
    use image::{Rgb, RgbImage};

    fn tiny_settings(epochs: usize) -> FitSettings {
        FitSettings {
            epochs,
            max_lr: 1e-3,
            batch_size: 2,
            num_workers: 1,
            image_size: 32,
            augmentation: AugmentationConfig::default(),
            seed: 43,
            weight_decay: 0.01,
        }
    }

    #[test]
    fn test_zero_epochs_returns_model_unchanged() {
        let device = default_device();
        let model = with_regression_head(EfficientNetConfig::b0().init::<TrainingBackend>(&device));
        let params = model.num_params();

        let outcome = fit_one_cycle(model, &[], None, &tiny_settings(0), "test", &device).unwrap();
        assert!(outcome.history.is_empty());
        assert_eq!(outcome.model.num_params(), params);
    }

    fn write_samples(dir: &std::path::Path, count: usize) -> Vec<SampleRecord> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("{}.png", i));
                RgbImage::from_pixel(40, 40, Rgb([(i * 25) as u8, 40, 90]))
                    .save(&path)
                    .unwrap();
                SampleRecord::new(path, (i % 5) as f32)
            })
            .collect()
    }

    fn tensor_values<const D: usize>(tensor: Tensor<TrainingBackend, D>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_one_epoch_records_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(dir.path(), 4);

        let device = default_device();
        let model = with_regression_head(EfficientNetConfig::b0().init::<TrainingBackend>(&device));

        let outcome = fit_one_cycle(
            model,
            &samples,
            Some(&samples[..2]),
            &tiny_settings(1),
            "test",
            &device,
        )
        .unwrap();

        assert_eq!(outcome.history.len(), 1);
        let record = &outcome.history[0];
        assert!(record.train_loss.is_finite());
        assert_eq!(record.valid.map(|v| v.samples), Some(2));
        assert_eq!(record.samples_seen, 4);
    }

    #[test]
    fn test_schedule_tracks_samples_across_workers() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(dir.path(), 10);

        let device = default_device();
        let model = with_regression_head(EfficientNetConfig::b0().init::<TrainingBackend>(&device));
        let settings = FitSettings {
            batch_size: 4,
            num_workers: 4,
            ..tiny_settings(1)
        };

        let outcome = fit_one_cycle(model, &samples, None, &settings, "test", &device).unwrap();
        let record = &outcome.history[0];
        let scheduler = OneCycleScheduler::new(settings.max_lr, 1, samples.len());

        assert_eq!(record.samples_seen, 10);
        // the last batch holds at most 4 samples, so it starts at 6..=9
        assert!(record.last_lr > scheduler.final_lr());
        assert!(record.last_lr <= scheduler.lr_at(6));
        assert!((scheduler.lr_at(record.samples_seen) - scheduler.final_lr()).abs() < 1e-12);
    }

    #[test]
    fn test_frozen_head_stays_fixed_while_backbone_trains() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(dir.path(), 4);

        let device = default_device();
        let model = with_regression_head(EfficientNetConfig::b0().init::<TrainingBackend>(&device));
        let model = set_head_trainable(model, false);

        let fc_weight = tensor_values(model.fc.weight.val());
        let fc_bias = tensor_values(model.fc.bias.as_ref().unwrap().val());
        let stem = tensor_values(model.conv_stem.weight.val());

        let outcome = fit_one_cycle(model, &samples, None, &tiny_settings(1), "test", &device).unwrap();
        let trained = outcome.model;

        assert_eq!(tensor_values(trained.fc.weight.val()), fc_weight);
        assert_eq!(tensor_values(trained.fc.bias.as_ref().unwrap().val()), fc_bias);
        assert_ne!(tensor_values(trained.conv_stem.weight.val()), stem);
    }

    #[test]
    fn test_unreadable_training_image_fails_the_fit() {
        let dir = tempfile::tempdir().unwrap();
        let mut samples = write_samples(dir.path(), 3);
        samples.push(SampleRecord::new(dir.path().join("missing.png"), 1.0));

        let device = default_device();
        let model = with_regression_head(EfficientNetConfig::b0().init::<TrainingBackend>(&device));

        let settings = FitSettings {
            batch_size: 4,
            ..tiny_settings(1)
        };
        let result = fit_one_cycle(model, &samples, None, &settings, "test", &device);
        assert!(result.is_err());
    }
}
