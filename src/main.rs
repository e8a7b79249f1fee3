//! Retina Grading CLI
//!
//! Runs the full two-stage experiment and writes `submission.csv`. With no
//! arguments every setting takes its default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::info;

use retina_grading::backend::{backend_name, default_device, half_precision, TrainingBackend};
use retina_grading::config::PipelineConfig;
use retina_grading::utils::logging::{init_logging, LogConfig, LogLevel};

/// Diabetic retinopathy grading with EfficientNet and Burn
///
/// Pre-trains on the auxiliary fundus set, fine-tunes on the competition
/// set, and writes threshold-rounded grades for the test images.
#[derive(Parser, Debug)]
#[command(name = "retina_grading")]
#[command(version)]
#[command(about = "Two-stage EfficientNet fine-tuning for retinopathy grading", long_about = None)]
struct Cli {
    /// JSON configuration file; missing fields take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error), overrides --verbose/--quiet
    #[arg(long)]
    log_level: Option<String>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Submission CSV path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long, default_value = "false")]
    dump_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config.level = LogLevel::parse(level);
    }

    let _ = init_logging(&log_config);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load configuration {:?}", path))?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(output) = cli.output {
        config.output_path = output;
    }

    if cli.dump_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    print_banner();
    info!(
        "Backend: {} (half precision: {})",
        backend_name(),
        half_precision()
    );
    info!("Seed {}, variant {}", config.seed, config.model.variant);

    let device = default_device();
    let summary = retina_grading::pipeline::run::<TrainingBackend>(&config, &device)?;

    println!();
    println!("{}", "Run summary:".cyan().bold());
    println!("  Auxiliary samples:  {}", summary.auxiliary_samples);
    println!(
        "  Competition split:  {} train / {} valid",
        summary.training_samples, summary.validation_samples
    );
    println!(
        "  Validation:         MSE {:.4}, kappa {:.4}",
        summary.validation.mse, summary.validation.kappa
    );
    println!("  Thresholds:         {:?}", summary.coefficients);
    println!("  Test grades 0-4:    {:?}", summary.grade_counts);
    println!("  Submission:         {:?}", summary.submission_path);

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════════════╗
 ║   Retina Grading                                                     ║
 ║   Diabetic Retinopathy Severity with EfficientNet + Burn             ║
 ║   Auxiliary pre-training, fine-tuning, TTA, ordinal thresholds       ║
 ╚══════════════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
    println!("  v{}", retina_grading::VERSION);
}
