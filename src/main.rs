//! VGG Transfer Learning CLI
//!
//! Trains a dense head on top of a frozen VGG16 backbone for a
//! folder-per-class image dataset, and evaluates or queries the saved model.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use vgg_transfer::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use vgg_transfer::dataset::SplitConfig;
use vgg_transfer::inference::{collect_image_paths, Predictor, DEFAULT_TOP_K};
use vgg_transfer::model::artifact::load_artifact;
use vgg_transfer::model::BackboneWeights;
use vgg_transfer::training::pipeline::load_partitions;
use vgg_transfer::training::{evaluate_artifact, run_transfer, TransferConfig};
use vgg_transfer::utils::format_duration;
use vgg_transfer::utils::logging::{init_logging, LogConfig};

/// Transfer learning with a frozen VGG16 backbone
#[derive(Parser, Debug)]
#[command(name = "vgg_transfer")]
#[command(version)]
#[command(about = "VGG16 transfer learning on image folders with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the classification head and save the model
    Train(TrainArgs),

    /// Show classes, per-class counts and split sizes
    Stats {
        /// Path to the dataset directory
        #[arg(short, long, default_value = vgg_transfer::DATA_DIR)]
        data_dir: PathBuf,

        #[arg(long, default_value_t = vgg_transfer::VALIDATION_SPLIT)]
        validation_split: f64,

        #[arg(long, default_value_t = vgg_transfer::SEED)]
        seed: u64,
    },

    /// Evaluate a saved model on the validation partition of a dataset
    Evaluate {
        /// Saved model directory
        #[arg(short, long, default_value = vgg_transfer::OUTPUT_DIR)]
        model: PathBuf,

        /// Path to the dataset directory
        #[arg(short, long, default_value = vgg_transfer::DATA_DIR)]
        data_dir: PathBuf,

        #[arg(long, default_value_t = vgg_transfer::VALIDATION_SPLIT)]
        validation_split: f64,

        #[arg(long, default_value_t = vgg_transfer::SEED)]
        seed: u64,

        #[arg(short, long, default_value_t = vgg_transfer::BATCH_SIZE)]
        batch_size: usize,
    },

    /// Predict classes for an image or every image in a directory
    Predict {
        /// Image file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Saved model directory
        #[arg(short, long, default_value = vgg_transfer::OUTPUT_DIR)]
        model: PathBuf,

        /// Number of classes to show per image
        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        /// Images per forward pass
        #[arg(short, long, default_value_t = vgg_transfer::BATCH_SIZE)]
        batch_size: usize,
    },
}

/// Training options; unset flags fall back to the config file, then defaults
#[derive(Args, Debug)]
struct TrainArgs {
    /// JSON run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the dataset directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Directory the trained model is written to
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(short, long)]
    epochs: Option<usize>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    #[arg(short, long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    image_size: Option<usize>,

    #[arg(long)]
    validation_split: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Pretrained backbone weights (.pth state dict or .mpk record)
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Use an untrained, randomly initialized backbone
    #[arg(long, default_value = "false", conflicts_with = "weights")]
    random_backbone: bool,

    /// Enable random flip/rotation of training images
    #[arg(long, default_value = "false")]
    augment: bool,

    /// Decode images on demand instead of caching them in memory
    #[arg(long, default_value = "false")]
    no_cache: bool,

    /// Also train the backbone
    #[arg(long, default_value = "false")]
    unfreeze: bool,

    /// Write the resolved configuration to this file
    #[arg(long)]
    save_config: Option<PathBuf>,
}

impl TrainArgs {
    fn resolve(self) -> Result<TransferConfig> {
        let mut config = match &self.config {
            Some(path) => TransferConfig::load(path)
                .with_context(|| format!("Failed to read config {:?}", path))?,
            None => TransferConfig::default(),
        };

        if let Some(v) = self.data_dir {
            config.data_dir = v;
        }
        if let Some(v) = self.output_dir {
            config.output_dir = v;
        }
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.image_size {
            config.image_size = v;
        }
        if let Some(v) = self.validation_split {
            config.validation_split = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(path) = self.weights {
            config.weights = BackboneWeights::from_path(path);
        }
        if self.random_backbone {
            config.weights = BackboneWeights::Random;
        }
        if self.augment {
            config.augment = true;
        }
        if self.no_cache {
            config.cache = false;
        }
        if self.unfreeze {
            config.freeze_backbone = false;
        }

        config.validate().context("Invalid configuration")?;

        if let Some(path) = self.save_config {
            config
                .save(&path)
                .with_context(|| format!("Failed to write config {:?}", path))?;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default().with_env_override()
    };
    init_logging(&log_config).map_err(anyhow::Error::msg)?;

    print_banner();

    match cli.command {
        Commands::Train(args) => train(args),
        Commands::Stats {
            data_dir,
            validation_split,
            seed,
        } => stats(data_dir, validation_split, seed),
        Commands::Evaluate {
            model,
            data_dir,
            validation_split,
            seed,
            batch_size,
        } => evaluate(model, data_dir, validation_split, seed, batch_size),
        Commands::Predict {
            input,
            model,
            top_k,
            batch_size,
        } => predict(input, model, top_k, batch_size),
    }
}

fn print_banner() {
    println!(
        "{} {}",
        "VGG Transfer".green().bold(),
        format!("v{}", vgg_transfer::VERSION).dimmed()
    );
    println!("  Backend: {}", backend_name());
    println!();
}

fn train(args: TrainArgs) -> Result<()> {
    let config = args.resolve()?;
    info!("Run configuration: {:?}", config);

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Data directory:   {:?}", config.data_dir);
    println!("  Output directory: {:?}", config.output_dir);
    println!("  Epochs:           {}", config.epochs);
    println!("  Batch size:       {}", config.batch_size);
    println!("  Learning rate:    {}", config.learning_rate);
    println!("  Image size:       {}", config.image_size);
    println!("  Augmentation:     {}", config.augment);
    println!("  Preprocessing:    {}", config.preprocessing);
    println!();

    let start = std::time::Instant::now();
    let outcome = run_transfer::<TrainingBackend>(&config, &default_device())
        .context("Training run failed")?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Baseline:   {}", outcome.baseline);
    if let Some(last) = outcome.history.last() {
        println!(
            "  Final:      val_loss: {:.4} - val_accuracy: {:.4}",
            last.val_loss, last.val_accuracy
        );
    }
    if let Some(best) = outcome.history.best_val_accuracy() {
        println!("  Best val accuracy: {:.2}%", best * 100.0);
    }
    println!("  Total time: {}", format_duration(start.elapsed().as_secs_f64()));
    println!("  Model:      {:?}", outcome.artifact_dir);
    Ok(())
}

fn stats(data_dir: PathBuf, validation_split: f64, seed: u64) -> Result<()> {
    let split = SplitConfig::new(validation_split, seed)?;
    let (dataset, partitions) = load_partitions(&data_dir, &split)
        .with_context(|| format!("Failed to load dataset from {:?}", data_dir))?;

    dataset.get_stats().print();
    println!();
    println!("{}", "Split:".cyan().bold());
    println!("  Training:   {}", partitions.training.len());
    println!("  Validation: {}", partitions.validation.len());
    Ok(())
}

fn evaluate(
    model: PathBuf,
    data_dir: PathBuf,
    validation_split: f64,
    seed: u64,
    batch_size: usize,
) -> Result<()> {
    let split = SplitConfig::new(validation_split, seed)?;
    let metrics = evaluate_artifact::<DefaultBackend>(
        &model,
        &data_dir,
        &split,
        batch_size,
        &default_device(),
    )
    .with_context(|| format!("Failed to evaluate {:?}", model))?;

    println!("{} {}", "Validation:".cyan().bold(), metrics);
    Ok(())
}

fn predict(input: PathBuf, model: PathBuf, top_k: usize, batch_size: usize) -> Result<()> {
    let device = default_device();
    let artifact = load_artifact::<DefaultBackend>(&model, &device)
        .with_context(|| format!("Failed to load model from {:?}", model))?;
    let paths = collect_image_paths(&input)?;

    let predictor = Predictor::new(artifact, device).with_batch_size(batch_size);
    for result in predictor.predict_paths(&paths, top_k)? {
        println!("{}", result.image_path.display().to_string().bold());
        for (rank, (_, name, prob)) in result.top_k.iter().enumerate() {
            println!("  {}. {:30} {:6.2}%", rank + 1, name, prob * 100.0);
        }
    }
    Ok(())
}
