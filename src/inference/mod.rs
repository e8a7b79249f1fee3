//! Inference module for test-set scoring
//!
//! This module provides:
//! - Order-preserving batched prediction
//! - Test-time augmentation over 8 corner-zoom passes
//! - Blending of plain and augmented scores

pub mod predictor;
pub mod tta;

pub use predictor::{PredictionStats, Predictor};
pub use tta::{average_passes, blend, predict_tta, TtaSettings, DEFAULT_BLEND_WEIGHT, DEFAULT_TTA_SCALE};
