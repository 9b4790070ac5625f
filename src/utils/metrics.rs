//! Metrics Module
//!
//! Loss/accuracy accumulation for evaluation and training passes, and the
//! per-epoch history written next to a saved model.

use serde::{Deserialize, Serialize};

/// Aggregate loss and accuracy over one pass of a partition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// Sample-weighted mean loss
    pub loss: f64,
    /// Fraction of correctly classified samples (0.0 - 1.0)
    pub accuracy: f64,
    /// Number of samples seen
    pub samples: usize,
}

impl std::fmt::Display for EvalMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "loss: {:.4} - accuracy: {:.4} ({} samples)",
            self.loss, self.accuracy, self.samples
        )
    }
}

/// Running sums for a pass over batches
#[derive(Debug, Clone, Default)]
pub struct MetricAccumulator {
    loss_sum: f64,
    correct: usize,
    total: usize,
}

impl MetricAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch: its mean loss, number of correct predictions and size
    pub fn update(&mut self, batch_loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += batch_loss * batch_size as f64;
        self.correct += correct;
        self.total += batch_size;
    }

    /// Accuracy so far, 0.0 before any update
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    /// Mean loss so far, 0.0 before any update
    pub fn loss(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.loss_sum / self.total as f64
        }
    }

    pub fn finish(&self) -> EvalMetrics {
        EvalMetrics {
            loss: self.loss(),
            accuracy: self.accuracy(),
            samples: self.total,
        }
    }
}

/// Metrics recorded at the end of one epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Epoch number (1-indexed)
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub duration_secs: f64,
}

/// Baseline evaluation plus every epoch of a fit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub baseline: Option<EvalMetrics>,
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    /// Best validation accuracy across epochs
    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.epochs
            .iter()
            .map(|e| e.val_accuracy)
            .fold(None, |best, acc| match best {
                Some(b) if b >= acc => Some(b),
                _ => Some(acc),
            })
    }
}
