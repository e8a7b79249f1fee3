//! Learning Rate Scheduler Module
//!
//! One-cycle policy indexed by training position (samples seen): cosine warmup from
//! `max_lr / div_factor` to `max_lr` over the first `pct_start` of training,
//! then cosine annealing down to `max_lr / (div_factor * final_div_factor)`.

use serde::{Deserialize, Serialize};

/// One-cycle learning rate schedule over `total_steps` positions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneCycleScheduler {
    pub max_lr: f64,
    pub total_steps: usize,
    pub pct_start: f64,
    pub div_factor: f64,
    pub final_div_factor: f64,
}

impl OneCycleScheduler {
    /// Create a one-cycle scheduler for `epochs` of `steps_per_epoch` positions
    pub fn new(max_lr: f64, epochs: usize, steps_per_epoch: usize) -> Self {
        Self {
            max_lr,
            total_steps: epochs * steps_per_epoch,
            pct_start: 0.3, // 30% warmup
            div_factor: 25.0,
            final_div_factor: 1e4,
        }
    }

    /// Number of warmup steps
    pub fn warmup_steps(&self) -> usize {
        (self.total_steps as f64 * self.pct_start) as usize
    }

    pub fn initial_lr(&self) -> f64 {
        self.max_lr / self.div_factor
    }

    pub fn final_lr(&self) -> f64 {
        self.max_lr / (self.div_factor * self.final_div_factor)
    }

    /// Learning rate for the 0-based optimizer `step`
    pub fn lr_at(&self, step: usize) -> f64 {
        let warmup = self.warmup_steps();

        if step < warmup {
            annealing_cos(self.initial_lr(), self.max_lr, step as f64 / warmup as f64)
        } else {
            let remaining = (self.total_steps - warmup).max(1);
            let pct = ((step - warmup) as f64 / remaining as f64).min(1.0);
            annealing_cos(self.max_lr, self.final_lr(), pct)
        }
    }

    /// Get a description of the scheduler
    pub fn description(&self) -> String {
        format!(
            "One-Cycle: max_lr={:.6}, steps={}, warmup={}",
            self.max_lr,
            self.total_steps,
            self.warmup_steps()
        )
    }
}

/// Cosine interpolation from `start` (pct = 0) to `end` (pct = 1)
fn annealing_cos(start: f64, end: f64, pct: f64) -> f64 {
    let cos_out = (std::f64::consts::PI * pct).cos() + 1.0;
    end + (start - end) / 2.0 * cos_out
}
