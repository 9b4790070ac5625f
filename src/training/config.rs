//! Run Configuration
//!
//! Every setting of a transfer-learning run. Defaults describe a Caltech-101
//! run with VGG16 at 224x224. Can be stored as JSON and overridden from
//! the command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::dataset::split::SplitConfig;
use crate::model::backbone::{BackboneWeights, VggBackboneConfig};
use crate::model::head::{HeadActivation, HeadConfig};
use crate::model::preprocess::Preprocessing;
use crate::model::transfer::TransferModelConfig;
use crate::utils::error::{Result, TransferError};

/// Configuration for one transfer-learning run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Root directory with one subdirectory per class
    pub data_dir: PathBuf,

    /// Where the trained model artifact is written
    pub output_dir: PathBuf,

    pub batch_size: usize,

    /// Images are resized to `image_size x image_size`
    pub image_size: usize,

    /// Fraction of samples held out for validation
    pub validation_split: f64,

    /// Seed for the split, epoch shuffling and augmentation
    pub seed: u64,

    pub epochs: usize,

    pub learning_rate: f64,

    /// Backbone parameter source; `{"kind": "random"}` trains on an untrained backbone
    pub weights: BackboneWeights,

    pub backbone: VggBackboneConfig,

    pub freeze_backbone: bool,

    pub hidden_units: Vec<usize>,

    pub head_activation: HeadActivation,

    pub dropout: f64,

    pub preprocessing: Preprocessing,

    /// Apply random flip/rotation to training batches
    pub augment: bool,

    pub augmentation: AugmentationConfig,

    /// Decode all images into memory before training
    pub cache: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(crate::DATA_DIR),
            output_dir: PathBuf::from(crate::OUTPUT_DIR),
            batch_size: crate::BATCH_SIZE,
            image_size: crate::IMAGE_SIZE,
            validation_split: crate::VALIDATION_SPLIT,
            seed: crate::SEED,
            epochs: crate::EPOCHS,
            learning_rate: crate::LEARNING_RATE,
            weights: BackboneWeights::default(),
            backbone: VggBackboneConfig::vgg16(),
            freeze_backbone: true,
            hidden_units: vec![512],
            head_activation: HeadActivation::Identity,
            dropout: 0.0,
            preprocessing: Preprocessing::ImageNet,
            augment: false,
            augmentation: AugmentationConfig::default(),
            cache: true,
        }
    }
}

impl TransferConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TransferError::Config("batch_size must be > 0".into()));
        }
        if self.image_size == 0 {
            return Err(TransferError::Config("image_size must be > 0".into()));
        }
        if self.epochs == 0 {
            return Err(TransferError::Config("epochs must be > 0".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(TransferError::Config(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }
        self.split_config().validate()?;
        self.backbone.validate()?;
        self.head_config().validate()?;
        if self.image_size < self.backbone.downsampling() {
            return Err(TransferError::Config(format!(
                "image_size {} is smaller than the backbone downsampling factor {}",
                self.image_size,
                self.backbone.downsampling()
            )));
        }
        Ok(())
    }

    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            validation_split: self.validation_split,
            seed: self.seed,
        }
    }

    pub fn head_config(&self) -> HeadConfig {
        HeadConfig {
            hidden_units: self.hidden_units.clone(),
            activation: self.head_activation,
            dropout: self.dropout,
        }
    }

    /// Model description for a dataset with `num_classes` classes
    pub fn model_config(&self, num_classes: usize) -> TransferModelConfig {
        TransferModelConfig::new(num_classes)
            .with_image_size(self.image_size)
            .with_backbone(self.backbone.clone())
            .with_head(self.head_config())
            .with_freeze_backbone(self.freeze_backbone)
    }
}
