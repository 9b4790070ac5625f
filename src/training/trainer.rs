//! Training loop for the transfer model
//!
//! The trainer owns the model, the optimizer and the device, and runs the
//! two operations of a transfer-learning run:
//! - `evaluate`: loss/accuracy over a partition, no parameter updates
//! - `fit`: epochs of shuffled mini-batch updates, each followed by an
//!   evaluation on the validation partition

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use colored::Colorize;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
use crate::dataset::burn_dataset::{ImageBatch, ImageBatcher, ImageFolderBurnDataset};
use crate::model::preprocess::Preprocessing;
use crate::model::transfer::TransferModel;
use crate::utils::error::{Result, TransferError};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{EpochMetrics, EvalMetrics, MetricAccumulator, TrainingHistory};

/// Hyperparameters the trainer needs at run time
#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Seeds epoch shuffling and augmentation
    pub seed: u64,
    pub image_size: usize,
    pub preprocessing: Preprocessing,
    /// `Some` enables augmentation of training batches
    pub augmentation: Option<AugmentationConfig>,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            batch_size: crate::BATCH_SIZE,
            learning_rate: crate::LEARNING_RATE,
            seed: crate::SEED,
            image_size: crate::IMAGE_SIZE,
            preprocessing: Preprocessing::ImageNet,
            augmentation: None,
        }
    }
}

/// Progress counters, reset only when a new trainer is built
#[derive(Debug, Clone, Default)]
pub struct TrainingState {
    /// Epochs completed
    pub epoch: usize,
    /// Optimizer steps taken
    pub iteration: usize,
    pub samples_seen: usize,
}

/// Adam with betas 0.9/0.999 and epsilon 1e-7
pub fn adam<B: AutodiffBackend>() -> impl Optimizer<TransferModel<B>, B> {
    AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-7)
        .init()
}

/// Owns the model and optimizer for one training run
pub struct Trainer<B: AutodiffBackend, O: Optimizer<TransferModel<B>, B>> {
    model: TransferModel<B>,
    optimizer: O,
    settings: TrainerSettings,
    device: B::Device,
    train_batcher: ImageBatcher,
    eval_batcher: ImageBatcher,
    rng: ChaCha8Rng,
    pub state: TrainingState,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<TransferModel<B>, B>,
{
    pub fn new(
        model: TransferModel<B>,
        optimizer: O,
        settings: TrainerSettings,
        device: B::Device,
    ) -> Self {
        let image_size = settings.image_size as u32;
        let eval_batcher = ImageBatcher::new(image_size, settings.preprocessing);
        let train_batcher = match settings.augmentation {
            Some(config) if !config.is_noop() => eval_batcher
                .clone()
                .with_augmentation(Augmenter::new(config), settings.seed),
            _ => eval_batcher.clone(),
        };

        Self {
            model,
            optimizer,
            rng: ChaCha8Rng::seed_from_u64(settings.seed),
            settings,
            device,
            train_batcher,
            eval_batcher,
            state: TrainingState::default(),
        }
    }

    pub fn model(&self) -> &TransferModel<B> {
        &self.model
    }

    pub fn into_model(self) -> TransferModel<B> {
        self.model
    }

    /// Loss and accuracy over `dataset` without updating parameters
    pub fn evaluate(&self, dataset: &ImageFolderBurnDataset) -> Result<EvalMetrics> {
        let model = self.model.valid();
        evaluate_model::<B::InnerBackend>(
            &model,
            dataset,
            &self.eval_batcher,
            self.settings.batch_size,
            &self.device,
        )
    }

    /// One pass over the training partition in a freshly shuffled order
    pub fn train_epoch(&mut self, dataset: &ImageFolderBurnDataset) -> Result<EvalMetrics> {
        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        indices.shuffle(&mut self.rng);

        let batch_size = self.settings.batch_size;
        let num_batches = indices.len().div_ceil(batch_size);
        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let mut metrics = MetricAccumulator::new();

        for (batch_idx, chunk) in indices.chunks(batch_size).enumerate() {
            let items = dataset.get_batch(chunk)?;
            let batch: ImageBatch<B> = self.train_batcher.batch(items, &self.device);
            let size = chunk.len();

            let logits = self.model.forward(batch.images);
            let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            metrics.update(loss_value, count_correct(logits, batch.targets), size);

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self
                .optimizer
                .step(self.settings.learning_rate, self.model.clone(), grads);

            self.state.iteration += 1;
            self.state.samples_seen += size;

            if (batch_idx + 1) % 10 == 0 || batch_idx + 1 == num_batches {
                debug!(
                    "  Batch {}/{}: loss = {:.4}, acc = {:.2}%",
                    batch_idx + 1,
                    num_batches,
                    loss_value,
                    metrics.accuracy() * 100.0
                );
            }
        }

        Ok(metrics.finish())
    }

    /// Train for `epochs` epochs, evaluating on `valid` after each one
    pub fn fit(
        &mut self,
        train: &ImageFolderBurnDataset,
        valid: &ImageFolderBurnDataset,
        epochs: usize,
    ) -> Result<TrainingHistory> {
        if train.is_empty() {
            return Err(TransferError::Model("Training partition is empty".into()));
        }
        if valid.is_empty() {
            warn!("Validation partition is empty; validation metrics will be zero");
        }

        info!(
            "Fitting for {} epochs on {} samples ({} validation), batch size {}",
            epochs,
            train.len(),
            valid.len(),
            self.settings.batch_size
        );

        let mut history = TrainingHistory::default();
        let mut logger = TrainingLogger::new(epochs);

        for epoch in 0..epochs {
            logger.start_epoch(epoch);
            println!("{}", format!("Epoch {}/{}", epoch + 1, epochs).yellow().bold());

            let train_metrics = self.train_epoch(train)?;
            let val_metrics = self.evaluate(valid)?;
            self.state.epoch += 1;

            let duration_secs = logger.end_epoch(
                train_metrics.loss,
                train_metrics.accuracy,
                val_metrics.loss,
                val_metrics.accuracy,
            );

            let is_best = history
                .best_val_accuracy()
                .map_or(true, |best| val_metrics.accuracy > best);
            println!(
                "  {} loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4} \
                 ({:.1}s){}",
                "→".cyan(),
                train_metrics.loss,
                train_metrics.accuracy,
                val_metrics.loss,
                val_metrics.accuracy,
                duration_secs,
                if is_best {
                    " (best)".green().to_string()
                } else {
                    String::new()
                }
            );

            history.push(EpochMetrics {
                epoch: epoch + 1,
                loss: train_metrics.loss,
                accuracy: train_metrics.accuracy,
                val_loss: val_metrics.loss,
                val_accuracy: val_metrics.accuracy,
                duration_secs,
            });
        }

        if let Some(last) = history.last() {
            logger.log_complete(last.val_accuracy);
        }
        Ok(history)
    }
}

/// Evaluate any model (training or inference backend) over a partition
pub fn evaluate_model<B: Backend>(
    model: &TransferModel<B>,
    dataset: &ImageFolderBurnDataset,
    batcher: &ImageBatcher,
    batch_size: usize,
    device: &B::Device,
) -> Result<EvalMetrics> {
    if batch_size == 0 {
        return Err(TransferError::Config("batch_size must be > 0".into()));
    }

    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut metrics = MetricAccumulator::new();
    let indices: Vec<usize> = (0..dataset.len()).collect();

    for chunk in indices.chunks(batch_size) {
        let items = dataset.get_batch(chunk)?;
        let batch: ImageBatch<B> = batcher.batch(items, device);

        let logits = model.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        let loss_value: f64 = loss.into_scalar().elem();

        metrics.update(loss_value, count_correct(logits, batch.targets), chunk.len());
    }

    Ok(metrics.finish())
}

/// Number of rows whose highest logit matches the target
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let correct: i64 = logits
        .argmax(1)
        .reshape([batch_size])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}
