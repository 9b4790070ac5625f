//! # VGG Transfer
//!
//! Transfer learning on folder-per-class image datasets (Caltech-101
//! layout) with the Burn framework: a frozen VGG16 feature extractor, a
//! small trainable dense head, and a plain training loop.
//!
//! ## Modules
//!
//! - `dataset`: class discovery, deterministic splits, batching, augmentation
//! - `model`: preprocessing, VGG backbone, head, saved artifacts
//! - `training`: configuration, trainer and the end-to-end pipeline
//! - `inference`: top-k prediction with a saved model
//! - `utils`: logging, metrics and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vgg_transfer::backend::{default_device, TrainingBackend};
//! use vgg_transfer::training::{run_transfer, TransferConfig};
//!
//! let config = TransferConfig::default();
//! let outcome = run_transfer::<TrainingBackend>(&config, &default_device())?;
//! println!("{:?}", outcome.history.last());
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use dataset::{
    ImageBatch, ImageBatcher, ImageFolderBurnDataset, ImageFolderDataset, SplitConfig,
};
pub use model::{TransferModel, TransferModelConfig};
pub use training::{run_transfer, Trainer, TransferConfig};
pub use utils::error::{Result, TransferError};

/// Default image size (square)
pub const IMAGE_SIZE: usize = 224;

/// Default batch size
pub const BATCH_SIZE: usize = 16;

/// Default fraction of samples held out for validation
pub const VALIDATION_SPLIT: f64 = 0.2;

/// Default seed for splitting, shuffling and augmentation
pub const SEED: u64 = 123;

/// Default number of epochs
pub const EPOCHS: usize = 5;

/// Default Adam learning rate
pub const LEARNING_RATE: f64 = 1e-3;

/// Default dataset location
pub const DATA_DIR: &str = "./caltech101";

/// Default torchvision VGG16 state dict for the backbone
pub const PRETRAINED_WEIGHTS: &str = "./weights/vgg16-397923af.pth";

/// Default artifact location
pub const OUTPUT_DIR: &str = "./saved_model/vgg_transfer";

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
