//! Utilities module for logging, metrics, seeding and error types
//!
//! This module provides:
//! - Structured logging with tracing
//! - Quadratic weighted kappa and regression metrics
//! - Run-wide seed control
//! - Error handling types

pub mod error;
pub mod logging;
pub mod metrics;
pub mod seed;

// Re-export main types for convenience
pub use error::{GradingError, Result};
pub use logging::init_logging;
pub use metrics::{quadratic_weighted_kappa, RegressionMetrics};
pub use seed::{seed_everything, SeedState};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Number of host cores, used as the data loader worker count
pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
