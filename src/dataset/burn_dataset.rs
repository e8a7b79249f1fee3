//! Burn Dataset Integration for fundus images
//!
//! Items are light `SampleRecord`s (path + grade); decoding, resizing and
//! augmentation all happen inside the batchers, in parallel with rayon.
//! A batch whose image fails to decode comes back as an `ImageLoadError`.
//!
//! - `FundusBatcher`: squish resize + normalize (validation/inference)
//! - `AugmentingBatcher`: training augmentation
//! - `TtaBatcher`: one fixed test-time augmentation pass

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::RgbImage;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::augmentation::{AugmentationConfig, Augmenter, IMAGENET_MEAN, IMAGENET_STD};
use super::table::SampleRecord;
use crate::utils::error::GradingError;

/// In-memory list of samples implementing Burn's Dataset trait
#[derive(Debug, Clone)]
pub struct FundusDataset {
    samples: Vec<SampleRecord>,
}

impl FundusDataset {
    pub fn new(samples: Vec<SampleRecord>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[SampleRecord] {
        &self.samples
    }

    /// Samples per integer grade
    pub fn grade_distribution(&self) -> [usize; 5] {
        let mut counts = [0usize; 5];
        for sample in &self.samples {
            let grade = sample.label.round().clamp(0.0, 4.0) as usize;
            counts[grade] += 1;
        }
        counts
    }
}

impl Dataset<SampleRecord> for FundusDataset {
    fn get(&self, index: usize) -> Option<SampleRecord> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of fundus images with regression targets
#[derive(Clone, Debug)]
pub struct FundusBatch<B: Backend> {
    /// Batch of images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Grades with shape [batch_size, 1]
    pub targets: Tensor<B, 2>,
}

/// Stack CHW images into a normalized batch
fn build_batch<B: Backend>(
    images_data: Vec<f32>,
    labels: Vec<f32>,
    image_size: usize,
    device: &B::Device,
) -> FundusBatch<B> {
    let batch_size = labels.len();

    let images = Tensor::<B, 4>::from_floats(
        TensorData::new(images_data, [batch_size, 3, image_size, image_size]),
        device,
    );

    // ImageNet normalization: (x - mean) / std
    let mean = Tensor::<B, 4>::from_floats(TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]), device);
    let std = Tensor::<B, 4>::from_floats(TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]), device);
    let images = (images - mean) / std;

    let targets = Tensor::<B, 2>::from_floats(TensorData::new(labels, [batch_size, 1]), device);

    FundusBatch { images, targets }
}

/// A sample whose image could not be decoded inside a batcher
///
/// Batcher output must be `Clone`, so decode failures travel as this type
/// and convert into [`GradingError::Image`] at the training loop or predictor.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageLoadError {
    pub path: PathBuf,
    pub message: String,
}

impl From<ImageLoadError> for GradingError {
    fn from(err: ImageLoadError) -> Self {
        GradingError::Image(err.path, err.message)
    }
}

/// What every batcher yields: a batch, or the first image that failed
pub type BatchResult<B> = std::result::Result<FundusBatch<B>, ImageLoadError>;

fn load(augmenter: &Augmenter, sample: &SampleRecord) -> std::result::Result<RgbImage, ImageLoadError> {
    augmenter.load(&sample.path).map_err(|e| ImageLoadError {
        path: sample.path.clone(),
        message: e.to_string(),
    })
}

/// Decode `items` in parallel with `view`, keeping item order
fn decode_views<F>(items: &[SampleRecord], seeds: &[u64], view: F) -> std::result::Result<Vec<f32>, ImageLoadError>
where
    F: Fn(&SampleRecord, u64) -> std::result::Result<Vec<f32>, ImageLoadError> + Sync,
{
    let views: Vec<Vec<f32>> = items
        .par_iter()
        .zip(seeds.par_iter())
        .map(|(item, seed)| view(item, *seed))
        .collect::<std::result::Result<_, _>>()?;
    Ok(views.concat())
}

/// FNV-1a over the path bytes
fn path_hash(path: &Path) -> u64 {
    path.to_string_lossy()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
            (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
        })
}

/// Seed for the `draw`-th use of `path` under `seed`
fn item_seed(seed: u64, path: &Path, draw: u64) -> u64 {
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ path_hash(path));
    rng.set_stream(draw);
    rng.next_u64()
}

/// Batcher without augmentation (for validation/inference)
#[derive(Clone, Debug)]
pub struct FundusBatcher {
    augmenter: Augmenter,
}

impl FundusBatcher {
    pub fn new(image_size: usize) -> Self {
        Self {
            augmenter: Augmenter::no_augmentation(image_size as u32),
        }
    }
}

impl<B: Backend> Batcher<B, SampleRecord, BatchResult<B>> for FundusBatcher {
    fn batch(&self, items: Vec<SampleRecord>, device: &B::Device) -> BatchResult<B> {
        let seeds = vec![0u64; items.len()];
        let images_data = decode_views(&items, &seeds, |item, _| {
            load(&self.augmenter, item).map(|img| self.augmenter.plain_view(&img))
        })?;
        let labels = items.iter().map(|item| item.label).collect();

        Ok(build_batch(images_data, labels, self.augmenter.image_size() as usize, device))
    }
}

/// Batcher that applies on-the-fly augmentation
///
/// An item's augmentation depends only on `seed`, its path and how many
/// times that path has been drawn before (its epoch), so results do not
/// depend on which loader worker builds which batch.
#[derive(Clone, Debug)]
pub struct AugmentingBatcher {
    augmenter: Augmenter,
    seed: u64,
    draws: Arc<Mutex<HashMap<PathBuf, u64>>>,
}

impl AugmentingBatcher {
    pub fn new(config: AugmentationConfig, image_size: usize, seed: u64) -> Self {
        Self {
            augmenter: Augmenter::new(config, image_size as u32),
            seed,
            draws: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn item_seeds(&self, items: &[SampleRecord]) -> Vec<u64> {
        let mut draws = self.draws.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        items
            .iter()
            .map(|item| {
                let count = draws.entry(item.path.clone()).or_insert(0);
                let draw = *count;
                *count += 1;
                item_seed(self.seed, &item.path, draw)
            })
            .collect()
    }
}

impl<B: Backend> Batcher<B, SampleRecord, BatchResult<B>> for AugmentingBatcher {
    fn batch(&self, items: Vec<SampleRecord>, device: &B::Device) -> BatchResult<B> {
        let seeds = self.item_seeds(&items);
        let images_data = decode_views(&items, &seeds, |item, seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            load(&self.augmenter, item).map(|img| self.augmenter.augment(img, &mut rng))
        })?;
        let labels = items.iter().map(|item| item.label).collect();

        Ok(build_batch(images_data, labels, self.augmenter.image_size() as usize, device))
    }
}

/// Batcher for a single test-time augmentation pass
#[derive(Clone, Debug)]
pub struct TtaBatcher {
    augmenter: Augmenter,
    pass: usize,
    scale: f32,
    seed: u64,
}

impl TtaBatcher {
    pub fn new(config: AugmentationConfig, image_size: usize, pass: usize, scale: f32, seed: u64) -> Self {
        Self {
            augmenter: Augmenter::new(config, image_size as u32),
            pass,
            scale,
            seed,
        }
    }
}

impl<B: Backend> Batcher<B, SampleRecord, BatchResult<B>> for TtaBatcher {
    fn batch(&self, items: Vec<SampleRecord>, device: &B::Device) -> BatchResult<B> {
        let seeds: Vec<u64> = items
            .iter()
            .map(|item| item_seed(self.seed, &item.path, 0))
            .collect();
        let images_data = decode_views(&items, &seeds, |item, seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            load(&self.augmenter, item).map(|img| self.augmenter.tta_view(img, self.pass, self.scale, &mut rng))
        })?;
        let labels = items.iter().map(|item| item.label).collect();

        Ok(build_batch(images_data, labels, self.augmenter.image_size() as usize, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};
    use image::Rgb;

    fn write_images(dir: &std::path::Path, count: usize) -> Vec<SampleRecord> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("img_{}.png", i));
                RgbImage::from_pixel(20, 12, Rgb([(i * 40) as u8, 90, 200]))
                    .save(&path)
                    .unwrap();
                SampleRecord::new(path, i as f32)
            })
            .collect()
    }

    #[test]
    fn test_dataset_access() {
        let dataset = FundusDataset::new(vec![
            SampleRecord::new("a.png", 0.0),
            SampleRecord::new("b.png", 4.0),
            SampleRecord::new("c.png", 4.0),
        ]);
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.get(1).unwrap().label, 4.0);
        assert!(dataset.get(3).is_none());
        assert_eq!(dataset.grade_distribution(), [1, 0, 0, 0, 2]);
    }

    #[test]
    fn test_plain_batch_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let items = write_images(dir.path(), 3);
        let device = default_device();

        let batch: FundusBatch<DefaultBackend> = FundusBatcher::new(16).batch(items, &device).unwrap();
        assert_eq!(batch.images.dims(), [3, 3, 16, 16]);
        assert_eq!(batch.targets.dims(), [3, 1]);

        let targets = batch.targets.into_data().to_vec::<f32>().unwrap();
        assert_eq!(targets, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_unreadable_image_fails_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut items = write_images(dir.path(), 2);
        let corrupt = dir.path().join("corrupt.png");
        std::fs::write(&corrupt, b"not a png").unwrap();
        items.push(SampleRecord::new(&corrupt, 2.0));
        let device = default_device();

        let result: BatchResult<DefaultBackend> = FundusBatcher::new(8).batch(items.clone(), &device);
        assert_eq!(result.unwrap_err().path, corrupt);

        let result: BatchResult<DefaultBackend> =
            AugmentingBatcher::new(AugmentationConfig::default(), 8, 1).batch(items, &device);
        let err = GradingError::from(result.unwrap_err());
        assert!(matches!(err, GradingError::Image(path, _) if path == corrupt));
    }

    #[test]
    fn test_augmenting_batcher_is_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let items = write_images(dir.path(), 2);
        let device = default_device();

        let a: FundusBatch<DefaultBackend> = AugmentingBatcher::new(AugmentationConfig::default(), 16, 7)
            .batch(items.clone(), &device)
            .unwrap();
        let b: FundusBatch<DefaultBackend> = AugmentingBatcher::new(AugmentationConfig::default(), 16, 7)
            .batch(items, &device)
            .unwrap();

        assert_eq!(
            a.images.into_data().to_vec::<f32>().unwrap(),
            b.images.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_augmentation_independent_of_batch_grouping() {
        let dir = tempfile::tempdir().unwrap();
        let items = write_images(dir.path(), 3);
        let device = default_device();
        let pixels = 3 * 16 * 16;

        // Batches reach the batcher in worker order, not dataset order
        let grouped = AugmentingBatcher::new(AugmentationConfig::default(), 16, 11);
        let late: FundusBatch<DefaultBackend> = grouped.batch(vec![items[2].clone()], &device).unwrap();
        let early: FundusBatch<DefaultBackend> = grouped.batch(items[..2].to_vec(), &device).unwrap();

        let single = AugmentingBatcher::new(AugmentationConfig::default(), 16, 11);
        let all: FundusBatch<DefaultBackend> = single.batch(items.clone(), &device).unwrap();
        let all = all.images.into_data().to_vec::<f32>().unwrap();

        assert_eq!(early.images.into_data().to_vec::<f32>().unwrap(), all[..2 * pixels].to_vec());
        assert_eq!(late.images.into_data().to_vec::<f32>().unwrap(), all[2 * pixels..].to_vec());

        // A second epoch draws fresh augmentations
        let second: FundusBatch<DefaultBackend> = single.batch(items, &device).unwrap();
        assert_ne!(second.images.into_data().to_vec::<f32>().unwrap(), all);
    }

    #[test]
    fn test_tta_batch_shape() {
        let dir = tempfile::tempdir().unwrap();
        let items = write_images(dir.path(), 2);
        let device = default_device();

        let batcher = TtaBatcher::new(AugmentationConfig::default(), 16, 5, 1.35, 43);
        let batch: FundusBatch<DefaultBackend> = batcher.batch(items, &device).unwrap();
        assert_eq!(batch.images.dims(), [2, 3, 16, 16]);
    }
}
