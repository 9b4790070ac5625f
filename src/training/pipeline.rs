//! End-to-end transfer-learning run
//!
//! Load the image folder, assemble the model, record a baseline
//! evaluation, fit the head and save the artifact. Any error aborts the
//! run before an artifact is written.

use std::path::{Path, PathBuf};

use burn::tensor::backend::{AutodiffBackend, Backend};
use colored::Colorize;
use tracing::{info, warn};

use super::config::TransferConfig;
use super::trainer::{adam, evaluate_model, Trainer, TrainerSettings};
use crate::dataset::burn_dataset::{ImageBatcher, ImageFolderBurnDataset};
use crate::dataset::loader::{ImageFolderDataset, ImageSample};
use crate::dataset::split::{DatasetSplit, SplitConfig};
use crate::model::artifact::{load_artifact, save_artifact, ArtifactManifest};
use crate::model::transfer::ModelSummary;
use crate::utils::error::{Result, TransferError};
use crate::utils::metrics::{EvalMetrics, TrainingHistory};

/// What a completed run produced
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub class_names: Vec<String>,
    pub train_samples: usize,
    pub val_samples: usize,
    pub baseline: EvalMetrics,
    pub history: TrainingHistory,
    pub artifact_dir: PathBuf,
}

/// Scan the data directory and split it
pub fn load_partitions(
    data_dir: &Path,
    split: &SplitConfig,
) -> Result<(ImageFolderDataset, DatasetSplit<ImageSample>)> {
    let dataset = ImageFolderDataset::new(data_dir)?;
    let partitions = dataset.split(split)?;
    Ok((dataset, partitions))
}

/// Wrap one partition for batching, decoding it up front when `cache` is set
pub fn build_partition(
    samples: &[ImageSample],
    image_size: usize,
    cache: bool,
) -> Result<ImageFolderBurnDataset> {
    if cache {
        ImageFolderBurnDataset::new_cached(samples, image_size as u32)
    } else {
        Ok(ImageFolderBurnDataset::new(samples, image_size as u32))
    }
}

fn print_class_names(class_names: &[String], total: usize) {
    println!(
        "Found {} files belonging to {} classes.",
        total,
        class_names.len()
    );
    println!("{} {:?}", "Class names:".cyan(), class_names);
    println!("{} {}", "Number of classes:".cyan(), class_names.len());
}

/// Run the whole transfer-learning procedure
pub fn run_transfer<B: AutodiffBackend>(
    config: &TransferConfig,
    device: &B::Device,
) -> Result<TransferOutcome> {
    config.validate()?;
    config.weights.ensure_available()?;

    println!("{}", "Loading Dataset...".cyan());
    let (dataset, partitions) = load_partitions(&config.data_dir, &config.split_config())?;
    print_class_names(&dataset.class_names, dataset.len());
    println!(
        "  Training samples:   {}\n  Validation samples: {}",
        partitions.training.len(),
        partitions.validation.len()
    );

    if config.cache {
        println!("{}", "Pre-loading Training Data...".cyan().bold());
    }
    let train = build_partition(&partitions.training, config.image_size, config.cache)?;
    if config.cache {
        println!("{}", "Pre-loading Validation Data...".cyan().bold());
    }
    let valid = build_partition(&partitions.validation, config.image_size, config.cache)?;

    println!("{}", "Creating Model...".cyan());
    let model_config = config.model_config(dataset.num_classes());
    if !config.weights.is_pretrained() {
        warn!("Random backbone requested; the frozen features are untrained");
    }
    let model = model_config.init_with_weights::<B>(&config.weights, device)?;
    println!("{}", ModelSummary::from_config(&model_config));

    let settings = TrainerSettings {
        batch_size: config.batch_size,
        learning_rate: config.learning_rate,
        seed: config.seed,
        image_size: config.image_size,
        preprocessing: config.preprocessing,
        augmentation: config.augment.then_some(config.augmentation),
    };
    let mut trainer = Trainer::new(model, adam::<B>(), settings, device.clone());

    let baseline = trainer.evaluate(&valid)?;
    println!("{} {}", "Baseline:".cyan().bold(), baseline);

    println!("{}", "Starting Training...".green().bold());
    let mut history = trainer.fit(&train, &valid, config.epochs)?;
    history.baseline = Some(baseline);

    println!("{}", "Saving Model...".cyan());
    let manifest = ArtifactManifest::new(
        model_config,
        dataset.class_names.clone(),
        config.preprocessing,
    );
    let artifact_dir =
        save_artifact(&config.output_dir, trainer.model(), &manifest, Some(&history))?;
    println!("  Saved to: {:?}", artifact_dir);

    Ok(TransferOutcome {
        class_names: dataset.class_names,
        train_samples: partitions.training.len(),
        val_samples: partitions.validation.len(),
        baseline,
        history,
        artifact_dir,
    })
}

/// Evaluate a saved model on the validation partition of `data_dir`
pub fn evaluate_artifact<B: Backend>(
    artifact_dir: &Path,
    data_dir: &Path,
    split: &SplitConfig,
    batch_size: usize,
    device: &B::Device,
) -> Result<EvalMetrics> {
    let artifact = load_artifact::<B>(artifact_dir, device)?;
    let (dataset, partitions) = load_partitions(data_dir, split)?;

    if dataset.class_names != artifact.manifest.class_names {
        return Err(TransferError::Config(format!(
            "Classes in {:?} do not match the {} classes the model was trained on",
            data_dir,
            artifact.manifest.class_names.len()
        )));
    }

    let image_size = artifact.manifest.model.image_size;
    let valid = build_partition(&partitions.validation, image_size, true)?;
    let batcher = ImageBatcher::new(image_size as u32, artifact.manifest.preprocessing);

    info!("Evaluating {:?} on {} samples", artifact_dir, partitions.validation.len());
    evaluate_model(&artifact.model, &valid, &batcher, batch_size, device)
}
