//! Training module for the two-stage fine-tuning
//!
//! This module contains:
//! - The one-cycle learning rate schedule
//! - The MSE/AdamW training loop
//! - Stage checkpoints
//! - The auxiliary and competition stages

pub mod checkpoint;
pub mod scheduler;
pub mod stages;
pub mod trainer;

pub use checkpoint::{save_stage, StageMetadata};
pub use scheduler::OneCycleScheduler;
pub use stages::{run_stage_one, run_stage_two, StageOneOutcome, StageTwoOutcome};
pub use trainer::{fit_one_cycle, EpochRecord, FitOutcome, FitSettings};
