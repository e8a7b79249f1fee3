//! # Retina Grading
//!
//! Two-stage transfer learning for diabetic retinopathy severity grading
//! with the Burn framework.
//!
//! ## Pipeline
//!
//! 1. Assemble the competition and auxiliary fundus tables into one
//!    `diagnosis,path` shape
//! 2. Load pretrained EfficientNet-B3 weights and swap in a single-output
//!    regression head
//! 3. Stage 1: one-cycle training on the auxiliary images with the head frozen
//! 4. Stage 2: head unfrozen, 80/20 split on the competition images
//! 5. Plain and 8-pass test-time augmented prediction, blended 0.4/0.6
//! 6. Threshold rounding to grades 0-4 and `submission.csv`
//!
//! ## Modules
//!
//! - `dataset`: Manifest tables, data assembly, splitting, augmentation and batchers
//! - `model`: EfficientNet and pretrained weight import
//! - `training`: One-cycle schedule, training loop, stages and checkpoints
//! - `inference`: Batched prediction and test-time augmentation
//! - `grading`: Ordinal rounding and the submission writer
//! - `utils`: Logging, metrics, seeding and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use retina_grading::backend::{default_device, TrainingBackend};
//! use retina_grading::config::PipelineConfig;
//!
//! let config = PipelineConfig::default();
//! let summary = retina_grading::pipeline::run::<TrainingBackend>(&config, &default_device())?;
//! println!("validation kappa {:.4}", summary.validation.kappa);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod grading;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::PipelineConfig;
pub use dataset::{FundusBatch, FundusDataset, ManifestTable, SampleRecord, TrainValidSplit};
pub use grading::{OptimizedRounder, OrdinalRounder};
pub use inference::Predictor;
pub use model::{EfficientNet, EfficientNetConfig, PretrainedRegistry};
pub use pipeline::PipelineSummary;
pub use utils::error::{GradingError, Result};
pub use utils::metrics::{quadratic_weighted_kappa, RegressionMetrics};

/// Lowest severity grade
pub const MIN_GRADE: f32 = 0.0;

/// Highest severity grade
pub const MAX_GRADE: f32 = 4.0;

/// Default input resolution for EfficientNet-B3
pub const IMAGE_SIZE: usize = 300;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
