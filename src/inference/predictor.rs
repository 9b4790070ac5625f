//! Inference Predictor Module
//!
//! Runs a restored model over image files and reports the most likely
//! classes with their softmax probabilities.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::dataset::burn_dataset::{ImageBatch, ImageBatcher, ImageItem};
use crate::dataset::loader::is_image_file;
use crate::model::artifact::LoadedArtifact;
use crate::model::transfer::TransferModel;
use crate::utils::error::{Result, TransferError};

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub image_path: PathBuf,

    /// Predicted class index
    pub predicted_class: usize,

    pub class_name: String,

    /// Probability of the predicted class
    pub confidence: f32,

    /// Highest-probability classes, best first
    pub top_k: Vec<(usize, String, f32)>,
}

impl PredictionResult {
    fn new(image_path: PathBuf, probabilities: &[f32], class_names: &[String], k: usize) -> Self {
        let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let top_k: Vec<(usize, String, f32)> = ranked
            .iter()
            .take(k.max(1))
            .map(|&(idx, prob)| {
                let name = class_names
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{}", idx));
                (idx, name, prob)
            })
            .collect();

        let (predicted_class, class_name, confidence) = top_k
            .first()
            .cloned()
            .unwrap_or((0, String::new(), 0.0));

        Self {
            image_path,
            predicted_class,
            class_name,
            confidence,
            top_k,
        }
    }
}

/// Wraps a restored model for prediction on image files
pub struct Predictor<B: Backend> {
    model: TransferModel<B>,
    class_names: Vec<String>,
    batcher: ImageBatcher,
    image_size: u32,
    batch_size: usize,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(artifact: LoadedArtifact<B>, device: B::Device) -> Self {
        let image_size = artifact.manifest.model.image_size as u32;
        Self {
            model: artifact.model,
            class_names: artifact.manifest.class_names,
            batcher: ImageBatcher::new(image_size, artifact.manifest.preprocessing),
            image_size,
            batch_size: crate::BATCH_SIZE,
            device,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Predict the top `k` classes for each image, in input order
    pub fn predict_paths(&self, paths: &[PathBuf], k: usize) -> Result<Vec<PredictionResult>> {
        let start = Instant::now();
        let mut results = Vec::with_capacity(paths.len());

        for chunk in paths.chunks(self.batch_size) {
            let items = chunk
                .iter()
                .map(|path| ImageItem::from_path(path, 0, self.image_size))
                .collect::<Result<Vec<_>>>()?;

            let batch: ImageBatch<B> = self.batcher.batch(items, &self.device);
            let probabilities: Vec<f32> = self
                .model
                .forward_softmax(batch.images)
                .into_data()
                .to_vec()
                .map_err(|e| TransferError::Model(format!("{:?}", e)))?;

            let num_classes = self.class_names.len();
            for (path, row) in chunk.iter().zip(probabilities.chunks(num_classes)) {
                results.push(PredictionResult::new(path.clone(), row, &self.class_names, k));
            }
        }

        tracing::debug!(
            "Predicted {} images in {:.1}ms",
            results.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(results)
    }
}

/// A single image file, or every image below a directory (sorted)
pub fn collect_image_paths(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(TransferError::DatasetNotFound(input.to_path_buf()));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(input)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(TransferError::NoImages(input.to_path_buf()));
    }
    Ok(paths)
}
