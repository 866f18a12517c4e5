//! Gesture Classifier CLI
//!
//! Checks experiment configs and runs a one-step smoke test of the
//! classification task on a synthetic clip.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use burn::tensor::{backend::Backend, ElementConversion, Tensor, TensorData};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use gesture_classifier::backend::{backend_name, default_device, TrainingBackend};
use gesture_classifier::model::{BackboneSpec, ClassifierConfig};
use gesture_classifier::training::{ClassificationTask, VideoBatch};
use gesture_classifier::utils::format_duration;
use gesture_classifier::utils::logging::{init_logging, LogConfig};

/// Spatial size used for R(2+1)D smoke clips, which accept any resolution
const R2PLUS1_SMOKE_SIZE: usize = 112;

/// Binary gesture classification on video clips
#[derive(Parser, Debug)]
#[command(name = "gesture_classifier")]
#[command(version = "0.1.0")]
#[command(about = "Binary gesture classification with video backbones on Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse and validate an experiment config
    Validate {
        /// Path to the JSON config
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Build the task and run one training step on a synthetic clip
    Smoke {
        /// Path to the JSON config
        #[arg(short, long)]
        config: PathBuf,

        /// Clips in the synthetic batch
        #[arg(short, long, default_value = "2")]
        batch_size: usize,

        /// Height and width of the synthetic clip (defaults to the backbone's input size)
        #[arg(long)]
        image_size: Option<usize>,

        /// Random seed for the synthetic clip
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Validate { config } => cmd_validate(&config)?,
        Commands::Smoke {
            config,
            batch_size,
            image_size,
            seed,
        } => cmd_smoke(&config, batch_size, image_size, seed)?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<ClassifierConfig> {
    ClassifierConfig::load(path)
        .with_context(|| format!("Failed to read config {}", path.display()))
}

fn cmd_validate(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    config.validate()?;
    let spec = config.model_spec()?;

    println!("{} {}", "Valid config:".green().bold(), path.display());
    println!("  Backbone:        {}", spec.backbone.kind().to_string().cyan());
    println!("  Input channels:  {} (keypoints {})", spec.in_channels(), spec.keypoints);
    println!("  Frames:          {}", spec.num_frames);
    println!("  Loss:            {}", config.loss_function()?);
    println!(
        "  Schedule:        {} at {:?} x{}",
        config.scheduler_kind()?,
        config.scheduler_milestones,
        config.scheduler_gamma
    );

    Ok(())
}

fn cmd_smoke(path: &Path, batch_size: usize, image_size: Option<usize>, seed: u64) -> Result<()> {
    let config = load_config(path)?;
    let spec = config.model_spec()?;
    let side = image_size.unwrap_or(match &spec.backbone {
        BackboneSpec::TimeSformer { config, .. } => config.img_size,
        BackboneSpec::VideoMae { config, .. } => config.image_size,
        BackboneSpec::R2Plus1(_) => R2PLUS1_SMOKE_SIZE,
    });

    info!("Running smoke step on {}", backend_name());
    let start = Instant::now();

    let device = default_device();
    let mut task = ClassificationTask::<TrainingBackend>::new(&config, &device)?;
    let batch = synthetic_batch::<TrainingBackend>(
        [batch_size, spec.num_frames, side, side, spec.in_channels()],
        seed,
        &device,
    );

    let loss = task.training_step(&batch, 0)?;
    let loss_value: f64 = loss.into_scalar().elem();
    let scores = task.train_metrics().compute();

    println!(
        "{} {}",
        "Smoke step finished in".green().bold(),
        format_duration(start.elapsed().as_secs_f64())
    );
    println!("  Loss:       {:.4}", loss_value);
    println!("  Accuracy:   {:.4}", scores.accuracy);
    println!("  Precision:  {:.4}", scores.precision);
    println!("  Recall:     {:.4}", scores.recall);
    println!("  F1:         {:.4}", scores.f1);
    println!("  IoU:        {:.4}", scores.iou);

    Ok(())
}

/// Uniform clip values in [0, 1) with alternating labels
fn synthetic_batch<B: Backend>(dims: [usize; 5], seed: u64, device: &B::Device) -> VideoBatch<B> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let values: Vec<f32> = (0..dims.iter().product::<usize>()).map(|_| rng.gen()).collect();
    let labels: Vec<i64> = (0..dims[0]).map(|i| (i % 2) as i64).collect();

    VideoBatch::new(
        Tensor::from_data(TensorData::new(values, dims), device),
        Tensor::from_data(TensorData::new(labels, [dims[0]]), device),
    )
}
