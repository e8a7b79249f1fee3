//! Grading module: ordinal rounding and the submission file

pub mod rounder;
pub mod submission;

pub use rounder::{OptimizedRounder, OptimizerSettings, OrdinalRounder, DEFAULT_COEFFICIENTS};
pub use submission::write_submission;
