//! Dataset module for the fundus grading data
//!
//! This module provides:
//! - CSV manifest tables and the unified `diagnosis,path` sample shape
//! - Assembly of the competition and auxiliary sources
//! - Random train/validation splitting
//! - Augmentation and Burn batchers

pub mod assembly;
pub mod augmentation;
pub mod burn_dataset;
pub mod split;
pub mod table;

pub use assembly::{load_auxiliary, load_primary, test_samples, validate_images, PrimaryData};
pub use augmentation::{AugmentationConfig, Augmenter, TTA_PASSES};
pub use burn_dataset::{
    AugmentingBatcher, BatchResult, FundusBatch, FundusBatcher, FundusDataset, ImageLoadError, TtaBatcher,
};
pub use split::TrainValidSplit;
pub use table::{ManifestTable, SampleRecord};
