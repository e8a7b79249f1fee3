//! Test-time augmentation and blending
//!
//! Eight passes: zoom by `scale` anchored at one of the four corners, with
//! and without a horizontal flip, each also receiving random rotation and
//! lighting. The pass mean is blended with the plain prediction.

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::predictor::Predictor;
use crate::dataset::{AugmentationConfig, SampleRecord, TtaBatcher, TTA_PASSES};
use crate::model::EfficientNet;
use crate::utils::error::{GradingError, Result};

/// Default corner zoom of the augmented passes
pub const DEFAULT_TTA_SCALE: f32 = 1.35;

/// Default weight of the plain prediction in the blend
pub const DEFAULT_BLEND_WEIGHT: f32 = 0.4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtaSettings {
    pub scale: f32,
    pub passes: usize,
    pub augmentation: AugmentationConfig,
    pub seed: u64,
}

impl Default for TtaSettings {
    fn default() -> Self {
        Self {
            scale: DEFAULT_TTA_SCALE,
            passes: TTA_PASSES,
            augmentation: AugmentationConfig::default(),
            seed: 0,
        }
    }
}

/// Scores from every augmented pass, in sample order
pub fn tta_passes<B: Backend>(
    predictor: &Predictor,
    model: &EfficientNet<B>,
    samples: &[SampleRecord],
    settings: &TtaSettings,
    device: &B::Device,
) -> Result<Vec<Vec<f32>>> {
    (0..settings.passes)
        .map(|pass| {
            info!("TTA pass {}/{}", pass + 1, settings.passes);
            let batcher = TtaBatcher::new(
                settings.augmentation.clone(),
                predictor.image_size(),
                pass,
                settings.scale,
                settings.seed.wrapping_add(pass as u64 * 1_000_003),
            );
            predictor
                .predict_with(model, &batcher, samples, device)
                .map(|(scores, _)| scores)
        })
        .collect()
}

/// Element-wise mean of the TTA passes
pub fn predict_tta<B: Backend>(
    predictor: &Predictor,
    model: &EfficientNet<B>,
    samples: &[SampleRecord],
    settings: &TtaSettings,
    device: &B::Device,
) -> Result<Vec<f32>> {
    let passes = tta_passes(predictor, model, samples, settings, device)?;
    average_passes(&passes)
}

/// Element-wise mean over equally long score vectors
pub fn average_passes(passes: &[Vec<f32>]) -> Result<Vec<f32>> {
    let Some(first) = passes.first() else {
        return Err(GradingError::Inference("No TTA passes to average".into()));
    };

    let len = first.len();
    if let Some(bad) = passes.iter().find(|p| p.len() != len) {
        return Err(GradingError::Inference(format!(
            "TTA passes differ in length ({} vs {})",
            len,
            bad.len()
        )));
    }

    let count = passes.len() as f32;
    Ok((0..len)
        .map(|i| passes.iter().map(|p| p[i]).sum::<f32>() / count)
        .collect())
}

/// `weight * raw + (1 - weight) * augmented` per index
pub fn blend(raw: &[f32], augmented: &[f32], weight: f32) -> Result<Vec<f32>> {
    if raw.len() != augmented.len() {
        return Err(GradingError::Inference(format!(
            "Cannot blend {} plain scores with {} augmented scores",
            raw.len(),
            augmented.len()
        )));
    }

    Ok(raw
        .iter()
        .zip(augmented)
        .map(|(r, a)| r * weight + a * (1.0 - weight))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};
    use crate::model::{with_regression_head, EfficientNetConfig};
    use image::{Rgb, RgbImage};

    #[test]
    fn test_blend_is_exact_per_index() {
        let raw = vec![0.0, 1.0, 2.0, 4.0];
        let tta = vec![1.0, 1.0, 3.0, 0.0];
        let blended = blend(&raw, &tta, 0.4).unwrap();

        for i in 0..raw.len() {
            let expected = 0.4 * raw[i] + 0.6 * tta[i];
            assert!((blended[i] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_blend_length_mismatch() {
        let err = blend(&[1.0, 2.0], &[1.0], 0.4).unwrap_err();
        assert!(matches!(err, GradingError::Inference(_)));
    }

    #[test]
    fn test_average_passes() {
        let passes = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert_eq!(average_passes(&passes).unwrap(), vec![2.0, 3.0]);

        assert!(average_passes(&[]).is_err());
        assert!(average_passes(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn test_predict_tta_length() {
        let device = default_device();
        let dir = tempfile::tempdir().unwrap();
        let model = with_regression_head(EfficientNetConfig::b0().init::<DefaultBackend>(&device));
        let samples: Vec<SampleRecord> = (0..3)
            .map(|i| {
                let path = dir.path().join(format!("{}.png", i));
                RgbImage::from_pixel(24, 24, Rgb([60 * i as u8, 80, 120])).save(&path).unwrap();
                SampleRecord::new(path, 0.0)
            })
            .collect();

        let settings = TtaSettings {
            passes: 2,
            ..TtaSettings::default()
        };
        let scores = predict_tta(&Predictor::new(2, 32), &model, &samples, &settings, &device).unwrap();
        assert_eq!(scores.len(), 3);
    }
}
