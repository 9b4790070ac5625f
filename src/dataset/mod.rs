//! Dataset module for folder-per-class image data
//!
//! - `loader`: class discovery and sample listing
//! - `split`: deterministic training/validation partitioning
//! - `burn_dataset`: Burn `Dataset` and `Batcher` implementations
//! - `augmentation`: optional random flip/rotation for training batches

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod split;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{ImageBatch, ImageBatcher, ImageFolderBurnDataset, ImageItem};
pub use loader::{DatasetStats, ImageFolderDataset, ImageSample};
pub use split::{split_samples, DatasetSplit, SplitConfig};
