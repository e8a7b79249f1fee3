//! Inference Predictor Module
//!
//! Scores a list of samples in their original order. Batches are built
//! sequentially rather than through the multi-worker data loader, whose
//! output order is not guaranteed.

use std::time::Instant;

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::{backend::Backend, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{BatchResult, FundusBatcher, SampleRecord};
use crate::model::EfficientNet;
use crate::utils::error::{GradingError, Result};

/// Flatten a `[batch, 1]` output into host scores
pub fn scores_from_output<B: Backend>(output: Tensor<B, 2>) -> Result<Vec<f32>> {
    output
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| GradingError::Inference(format!("Failed to read model output: {:?}", e)))
}

/// Timing summary of one prediction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionStats {
    pub samples: usize,
    pub batches: usize,
    pub elapsed_ms: f64,
}

impl PredictionStats {
    pub fn throughput(&self) -> f64 {
        if self.elapsed_ms <= 0.0 {
            0.0
        } else {
            self.samples as f64 / (self.elapsed_ms / 1000.0)
        }
    }
}

/// Batched, order-preserving predictor
#[derive(Debug, Clone)]
pub struct Predictor {
    batch_size: usize,
    image_size: usize,
}

impl Predictor {
    pub fn new(batch_size: usize, image_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            image_size,
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Single pass without augmentation
    pub fn predict<B: Backend>(
        &self,
        model: &EfficientNet<B>,
        samples: &[SampleRecord],
        device: &B::Device,
    ) -> Result<Vec<f32>> {
        let batcher = FundusBatcher::new(self.image_size);
        self.predict_with(model, &batcher, samples, device)
            .map(|(scores, _)| scores)
    }

    /// Score `samples` through any batcher, keeping input order
    pub fn predict_with<B, T>(
        &self,
        model: &EfficientNet<B>,
        batcher: &T,
        samples: &[SampleRecord],
        device: &B::Device,
    ) -> Result<(Vec<f32>, PredictionStats)>
    where
        B: Backend,
        T: Batcher<B, SampleRecord, BatchResult<B>>,
    {
        let start = Instant::now();
        let mut scores = Vec::with_capacity(samples.len());

        let pb = ProgressBar::new(samples.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut batches = 0;
        for chunk in samples.chunks(self.batch_size) {
            let batch = batcher.batch(chunk.to_vec(), device)?;
            let output = model.forward(batch.images);
            scores.extend(scores_from_output(output)?);

            batches += 1;
            pb.inc(chunk.len() as u64);
        }
        pb.finish_and_clear();

        if scores.len() != samples.len() {
            return Err(GradingError::Inference(format!(
                "Expected {} scores, model produced {}",
                samples.len(),
                scores.len()
            )));
        }

        let stats = PredictionStats {
            samples: samples.len(),
            batches,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        debug!(
            "Scored {} samples in {} batches ({:.1} img/s)",
            stats.samples,
            stats.batches,
            stats.throughput()
        );

        Ok((scores, stats))
    }
}
