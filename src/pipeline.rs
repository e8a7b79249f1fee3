//! End-to-end run: assemble data, train both stages, score the test set and
//! write the submission.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use burn::module::{AutodiffModule, Module};
use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::precision_warning;
use crate::config::PipelineConfig;
use crate::dataset::assembly::{LABEL_COLUMN, PATH_COLUMN};
use crate::dataset::{load_auxiliary, load_primary, test_samples, validate_images, TrainValidSplit};
use crate::grading::{write_submission, OptimizedRounder, OptimizerSettings, OrdinalRounder};
use crate::inference::{blend, predict_tta, Predictor, TtaSettings};
use crate::model::{with_regression_head, EfficientNet, PretrainedRegistry};
use crate::training::{run_stage_one, run_stage_two, EpochRecord};
use crate::utils::format_duration;
use crate::utils::metrics::{round_half_even, RegressionMetrics};
use crate::utils::seed::seed_everything;

/// What a finished run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub auxiliary_samples: usize,
    pub training_samples: usize,
    pub validation_samples: usize,
    pub test_samples: usize,
    pub stage_one_history: Vec<EpochRecord>,
    pub stage_two_history: Vec<EpochRecord>,
    pub validation: RegressionMetrics,
    pub coefficients: [f32; 4],
    /// Count of predicted test grades 0..=4
    pub grade_counts: [usize; 5],
    pub submission_path: PathBuf,
    pub elapsed_seconds: f64,
}

/// Run the whole experiment on backend `B`
///
/// Loads the configured ImageNet checkpoint, then continues as [`run_with_model`].
pub fn run<B: AutodiffBackend>(config: &PipelineConfig, device: &B::Device) -> Result<PipelineSummary> {
    let registry = PretrainedRegistry::new(&config.model.weights_dir);
    let backbone = registry
        .load::<B>(&config.model.variant, device)
        .with_context(|| format!("failed to load pretrained {}", config.model.variant))?;

    run_with_model(config, backbone, device)
}

/// Run the experiment starting from an already built `backbone`
///
/// The backbone's classifier is replaced by the regression head before stage 1.
pub fn run_with_model<B: AutodiffBackend>(
    config: &PipelineConfig,
    backbone: EfficientNet<B>,
    device: &B::Device,
) -> Result<PipelineSummary> {
    let start = Instant::now();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
    if let Some(caveat) = precision_warning() {
        warn!("{}", caveat);
    }

    let mut seeds = seed_everything::<B>(config.seed, device);

    // Data
    println!("{}", "Assembling data".cyan().bold());
    let primary = load_primary(&config.data.primary_root, &mut seeds.rng_for("primary-shuffle"))
        .context("failed to load the competition data")?;
    let auxiliary = load_auxiliary(&config.data.auxiliary_root, &mut seeds.rng_for("auxiliary-shuffle"))
        .context("failed to load the auxiliary data")?;

    let auxiliary_samples = auxiliary.to_samples(PATH_COLUMN, LABEL_COLUMN)?;
    let primary_samples = primary.train_samples()?;
    let test = test_samples(&config.data.primary_root, &primary.test)?;

    validate_images("auxiliary", &auxiliary_samples)?;
    validate_images("competition", &primary_samples)?;
    validate_images("test", &test)?;

    // Model
    let model = with_regression_head(backbone);
    info!("Model {} ready: {} parameters", config.model.variant, model.num_params());

    // Stages
    let stage_one = run_stage_one(model, &auxiliary_samples, config, &mut seeds, device)?;

    let split = TrainValidSplit::random(
        &primary_samples,
        config.data.valid_fraction,
        &mut seeds.rng_for("valid-split"),
    )?;
    let stage_two = run_stage_two(stage_one.model, &split, config, &mut seeds, device)?;

    // Test scoring
    println!("{}", "Scoring test images".cyan().bold());
    let model = stage_two.model.valid();
    let predictor = Predictor::new(config.data.batch_size, config.data.image_size);

    let raw = predictor
        .predict(&model, &test, device)
        .context("plain test prediction failed")?;
    let tta_settings = TtaSettings {
        scale: config.inference.tta_scale,
        augmentation: config.data.augmentation.clone(),
        seed: seeds.derive("tta"),
        ..TtaSettings::default()
    };
    let augmented = predict_tta(&predictor, &model, &test, &tta_settings, device)
        .context("test-time augmentation failed")?;
    let scores = blend(&raw, &augmented, config.inference.blend_weight)?;

    // Grades
    let rounder = build_rounder(config, &stage_two.valid_predictions, &stage_two.valid_labels);
    let grades = rounder.predict(&scores);

    let mut grade_counts = [0usize; 5];
    for &g in &grades {
        grade_counts[g.clamp(0, 4) as usize] += 1;
    }

    write_submission(&primary.test, &grades, &config.output_path)
        .with_context(|| format!("failed to write {:?}", config.output_path))?;

    let elapsed_seconds = start.elapsed().as_secs_f64();
    println!(
        "{} {} grades written to {:?} in {}",
        "Done:".green().bold(),
        grades.len(),
        config.output_path,
        format_duration(elapsed_seconds)
    );
    info!("Predicted grade counts: {:?}", grade_counts);

    Ok(PipelineSummary {
        auxiliary_samples: auxiliary_samples.len(),
        training_samples: split.train.len(),
        validation_samples: split.valid.len(),
        test_samples: test.len(),
        stage_one_history: stage_one.history,
        stage_two_history: stage_two.history,
        validation: stage_two.valid_metrics,
        coefficients: rounder.coefficients,
        grade_counts,
        submission_path: config.output_path.clone(),
        elapsed_seconds,
    })
}

/// Fixed thresholds, or thresholds tuned on the validation scores
fn build_rounder(
    config: &PipelineConfig,
    valid_predictions: &[f32],
    valid_labels: &[f32],
) -> OrdinalRounder {
    if !config.rounding.optimize {
        return OrdinalRounder::new(config.rounding.coefficients);
    }

    let labels = round_half_even(valid_labels);
    let optimizer = OptimizedRounder::new(OptimizerSettings::default());
    match optimizer.fit(valid_predictions, &labels) {
        Ok(rounder) => rounder,
        Err(e) => {
            warn!("Rounder optimisation skipped: {}; using configured thresholds", e);
            OrdinalRounder::new(config.rounding.coefficients)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, TrainingBackend};
    use crate::dataset::assembly::auxiliary_image_dir;
    use crate::model::EfficientNetConfig;
    use crate::training::StageMetadata;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::path::Path;

    const TEST_IDS: [&str; 3] = ["ffa47f6a7bf4", "0a2b5e1a0be8", "7c2e1a0f0b3d"];

    fn write_image(path: &Path, shade: u8) {
        RgbImage::from_pixel(40, 40, Rgb([shade, shade / 2, 30])).save(path).unwrap();
    }

    /// Competition and auxiliary folders laid out as on Kaggle, with tiny images
    fn synthetic_run(root: &Path) -> PipelineConfig {
        let primary = root.join("aptos");
        let auxiliary = root.join("resized");
        fs::create_dir_all(primary.join("train_images")).unwrap();
        fs::create_dir_all(primary.join("test_images")).unwrap();
        fs::create_dir_all(auxiliary_image_dir(&auxiliary)).unwrap();

        let mut train_csv = String::from("id_code,diagnosis\n");
        for i in 0..5 {
            let id = format!("train{}", i);
            write_image(&primary.join("train_images").join(format!("{}.png", id)), 40 * i as u8);
            train_csv.push_str(&format!("{},{}\n", id, i % 5));
        }
        fs::write(primary.join("train.csv"), train_csv).unwrap();

        let mut test_csv = String::from("id_code,diagnosis\n");
        for (i, id) in TEST_IDS.iter().enumerate() {
            write_image(&primary.join("test_images").join(format!("{}.png", id)), 70 * i as u8);
            test_csv.push_str(&format!("{},0\n", id));
        }
        fs::write(primary.join("sample_submission.csv"), test_csv).unwrap();

        let mut aux_csv = String::from("Unnamed: 0,Unnamed: 0.1,image,level\n");
        for i in 0..4 {
            let image = format!("{}_left", 10 + i);
            write_image(
                &auxiliary_image_dir(&auxiliary).join(format!("{}.jpeg", image)),
                50 * i as u8,
            );
            aux_csv.push_str(&format!("{},{},{},{}\n", i, i, image, i % 5));
        }
        fs::write(auxiliary.join("trainLabels_cropped.csv"), aux_csv).unwrap();

        let mut config = PipelineConfig::default();
        config.data.primary_root = primary;
        config.data.auxiliary_root = auxiliary;
        config.data.image_size = 32;
        config.data.batch_size = 2;
        config.data.num_workers = 1;
        config.model.variant = "efficientnet-b0".to_string();
        config.model.model_root = root.to_path_buf();
        config.stage_one.epochs = 1;
        config.stage_two.epochs = 1;
        config.output_path = root.join("out").join("submission.csv");
        config
    }

    #[test]
    fn test_run_writes_submission_in_test_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = synthetic_run(dir.path());
        let device = default_device();
        let backbone = EfficientNetConfig::b0().init::<TrainingBackend>(&device);

        let summary = run_with_model(&config, backbone, &device).unwrap();

        assert_eq!(summary.auxiliary_samples, 4);
        assert_eq!(summary.training_samples + summary.validation_samples, 5);
        assert_eq!(summary.test_samples, 3);
        assert_eq!(summary.stage_one_history.len(), 1);
        assert_eq!(summary.stage_two_history.len(), 1);
        assert_eq!(summary.grade_counts.iter().sum::<usize>(), 3);

        let written = fs::read_to_string(&config.output_path).unwrap();
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("id_code,diagnosis"));
        let rows: Vec<(String, i64)> = lines
            .map(|line| {
                let (id, grade) = line.split_once(',').unwrap();
                (id.to_string(), grade.parse().unwrap())
            })
            .collect();
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, TEST_IDS);
        assert!(rows.iter().all(|(_, grade)| (0..=4).contains(grade)));

        let stage_one = StageMetadata::load(&dir.path().join("old_weights")).unwrap();
        assert_eq!(stage_one.training_samples, 4);
        let stage_two = StageMetadata::load(&dir.path().join("weights")).unwrap();
        assert_eq!(stage_two.validation_samples, summary.validation_samples);
    }

    #[test]
    fn test_missing_test_image_stops_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let config = synthetic_run(dir.path());
        fs::remove_file(
            config
                .data
                .primary_root
                .join("test_images")
                .join(format!("{}.png", TEST_IDS[1])),
        )
        .unwrap();

        let device = default_device();
        let backbone = EfficientNetConfig::b0().init::<TrainingBackend>(&device);
        let err = run_with_model(&config, backbone, &device).unwrap_err();

        assert!(format!("{:#}", err).contains(TEST_IDS[1]));
        assert!(!dir.path().join("old_weights").exists());
        assert!(!config.output_path.exists());
    }

    #[test]
    fn test_fixed_rounder_by_default() {
        let config = PipelineConfig::default();
        let rounder = build_rounder(&config, &[0.2, 3.7], &[0.0, 4.0]);
        assert_eq!(rounder.coefficients, config.rounding.coefficients);
    }

    #[test]
    fn test_optimized_rounder_without_validation_falls_back() {
        let mut config = PipelineConfig::default();
        config.rounding.optimize = true;
        config.rounding.coefficients = [0.4, 1.4, 2.4, 3.4];

        let rounder = build_rounder(&config, &[], &[]);
        assert_eq!(rounder.coefficients, [0.4, 1.4, 2.4, 3.4]);
    }

    #[test]
    fn test_optimized_rounder_fits_validation_scores() {
        let mut config = PipelineConfig::default();
        config.rounding.optimize = true;

        let labels = [0.0, 0.0, 1.0, 2.0, 2.0, 3.0, 4.0, 4.0];
        let scores = [0.1, 0.3, 1.2, 1.9, 2.2, 3.1, 3.6, 4.2];
        let rounder = build_rounder(&config, &scores, &labels);

        let grades = rounder.predict(&scores);
        assert_eq!(grades, vec![0, 0, 1, 2, 2, 3, 4, 4]);
    }
}
