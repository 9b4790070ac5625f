//! Deterministic training/validation split
//!
//! The full sample list is shuffled once with a seeded ChaCha8 RNG and cut
//! in two: the last `floor(validation_split * N)` samples form the
//! validation subset, the rest the training subset. The same seed and
//! fraction always yield the same, disjoint partitions.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, TransferError};

/// Configuration for the training/validation split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of samples held out for validation, in (0, 1)
    pub validation_split: f64,
    /// Seed for the shuffle
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_split: crate::VALIDATION_SPLIT,
            seed: crate::SEED,
        }
    }
}

impl SplitConfig {
    pub fn new(validation_split: f64, seed: u64) -> Result<Self> {
        let config = Self {
            validation_split,
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(TransferError::InvalidSplit(self.validation_split));
        }
        Ok(())
    }

    /// Number of validation samples for a dataset of `total` samples
    pub fn validation_count(&self, total: usize) -> usize {
        (self.validation_split * total as f64).floor() as usize
    }
}

/// The two partitions produced by a split
#[derive(Debug, Clone)]
pub struct DatasetSplit<T> {
    pub training: Vec<T>,
    pub validation: Vec<T>,
}

impl<T> DatasetSplit<T> {
    pub fn len(&self) -> usize {
        self.training.len() + self.validation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shuffle `samples` with the configured seed and cut off the validation tail
pub fn split_samples<T: Clone>(samples: &[T], config: &SplitConfig) -> Result<DatasetSplit<T>> {
    config.validate()?;

    let mut shuffled = samples.to_vec();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    shuffled.shuffle(&mut rng);

    let num_val = config.validation_count(shuffled.len());
    let validation = shuffled.split_off(shuffled.len() - num_val);

    tracing::debug!(
        "Split {} samples into {} training / {} validation (seed {})",
        samples.len(),
        shuffled.len(),
        validation.len(),
        config.seed
    );

    Ok(DatasetSplit {
        training: shuffled,
        validation,
    })
}
