//! Burn Dataset Integration
//!
//! Implements Burn's `Dataset` and `Batcher` traits for image folder
//! partitions. Items hold raw resized pixels; the batcher applies optional
//! augmentation and the model's preprocessing when it builds a batch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{info, warn};

use super::augmentation::Augmenter;
use super::loader::{load_rgb_image, ImageSample};
use crate::model::preprocess::Preprocessing;
use crate::utils::error::{Result, TransferError};

const PROGRESS_TEMPLATE: &str =
    "  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})";

/// A decoded, resized image with its label
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Raw RGB pixels in row-major HWC order, `image_size * image_size * 3` bytes
    pub pixels: Vec<u8>,
    /// Class label
    pub label: usize,
    /// Source path (for logging)
    pub path: String,
}

impl ImageItem {
    /// Decode and resize the image at `path`
    pub fn from_path(path: &Path, label: usize, image_size: u32) -> Result<Self> {
        let img = load_rgb_image(path, image_size)?;
        Ok(Self {
            pixels: img.into_raw(),
            label,
            path: path.to_string_lossy().to_string(),
        })
    }

    /// Build from an in-memory RGB image
    pub fn from_image(img: RgbImage, label: usize, path: impl Into<String>) -> Self {
        Self {
            pixels: img.into_raw(),
            label,
            path: path.into(),
        }
    }

    fn to_image(&self, image_size: u32) -> Option<RgbImage> {
        RgbImage::from_raw(image_size, image_size, self.pixels.clone())
    }
}

/// One partition of an image folder, loaded lazily or held in memory
#[derive(Debug, Clone)]
pub struct ImageFolderBurnDataset {
    samples: Vec<(PathBuf, usize)>,
    image_size: u32,
    cached_items: Option<Vec<ImageItem>>,
}

impl ImageFolderBurnDataset {
    /// Lazy dataset: images are decoded each time they are requested
    pub fn new(samples: &[ImageSample], image_size: u32) -> Self {
        Self {
            samples: samples.iter().map(|s| (s.path.clone(), s.label)).collect(),
            image_size,
            cached_items: None,
        }
    }

    /// Decode every image up front, in parallel, and keep them in memory
    pub fn new_cached(samples: &[ImageSample], image_size: u32) -> Result<Self> {
        let total = samples.len();
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
            pb.set_style(style.progress_chars("#>-"));
        }

        let loaded = AtomicUsize::new(0);
        let items: Result<Vec<ImageItem>> = samples
            .par_iter()
            .map(|s| {
                let item = ImageItem::from_path(&s.path, s.label, image_size);
                let count = loaded.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 50 == 0 || count == total {
                    pb.set_position(count as u64);
                }
                item
            })
            .collect();
        pb.finish_and_clear();

        let items = items?;
        info!("Cached {} images at {}x{}", items.len(), image_size, image_size);

        Ok(Self {
            samples: samples.iter().map(|s| (s.path.clone(), s.label)).collect(),
            image_size,
            cached_items: Some(items),
        })
    }

    /// In-memory dataset from already decoded items of `image_size x image_size`
    pub fn from_items(items: Vec<ImageItem>, image_size: u32) -> Result<Self> {
        let expected = image_size as usize * image_size as usize * 3;
        if let Some(item) = items.iter().find(|item| item.pixels.len() != expected) {
            return Err(TransferError::Model(format!(
                "Item {} has {} bytes, expected {} for {}x{} RGB",
                item.path,
                item.pixels.len(),
                expected,
                image_size,
                image_size
            )));
        }

        Ok(Self {
            samples: items
                .iter()
                .map(|item| (PathBuf::from(&item.path), item.label))
                .collect(),
            image_size,
            cached_items: Some(items),
        })
    }

    pub fn is_cached(&self) -> bool {
        self.cached_items.is_some()
    }

    /// Fetch one item, surfacing decode failures instead of hiding them
    pub fn try_get(&self, index: usize) -> Result<ImageItem> {
        if let Some(ref cached) = self.cached_items {
            return cached.get(index).cloned().ok_or_else(|| {
                TransferError::Model(format!("Item index {} out of range", index))
            });
        }

        let (path, label) = self.samples.get(index).ok_or_else(|| {
            TransferError::Model(format!("Item index {} out of range", index))
        })?;
        ImageItem::from_path(path, *label, self.image_size)
    }

    /// Fetch the items for a batch of indices
    pub fn get_batch(&self, indices: &[usize]) -> Result<Vec<ImageItem>> {
        indices.iter().map(|&i| self.try_get(i)).collect()
    }

    /// Labels in dataset order
    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|(_, label)| *label).collect()
    }
}

/// `try_get` and `get_batch` are the accessors that report failures;
/// `get` can only log them.
impl Dataset<ImageItem> for ImageFolderBurnDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        match self.try_get(index) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Dropping item {}: {}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of images ready for the model
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Preprocessed images, shape `[batch_size, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// Labels, shape `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

/// Builds preprocessed batches, optionally augmenting each item first
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: u32,
    preprocessing: Preprocessing,
    augmenter: Option<Augmenter>,
    seed: u64,
    batches_built: Arc<AtomicU64>,
}

impl ImageBatcher {
    pub fn new(image_size: u32, preprocessing: Preprocessing) -> Self {
        Self {
            image_size,
            preprocessing,
            augmenter: None,
            seed: crate::SEED,
            batches_built: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enable per-item augmentation, seeded for reproducibility
    pub fn with_augmentation(mut self, augmenter: Augmenter, seed: u64) -> Self {
        self.augmenter = Some(augmenter);
        self.seed = seed;
        self
    }

    /// Raw pixels of one item as CHW floats, augmented if configured
    fn item_chw(&self, item: &ImageItem, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let size = self.image_size as usize;
        let pixels = match (&self.augmenter, item.to_image(self.image_size)) {
            (Some(augmenter), Some(img)) => augmenter.augment(img, rng).into_raw(),
            _ => item.pixels.clone(),
        };

        let plane = size * size;
        let mut chw = vec![0.0f32; 3 * plane];
        for (i, px) in pixels.chunks_exact(3).enumerate().take(plane) {
            chw[i] = px[0] as f32;
            chw[plane + i] = px[1] as f32;
            chw[2 * plane + i] = px[2] as f32;
        }
        chw
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size as usize;

        let batch_index = self.batches_built.fetch_add(1, Ordering::Relaxed);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(batch_index));

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| self.item_chw(item, &mut rng))
            .collect();

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );
        let images = self.preprocessing.apply(images);

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch { images, targets }
    }
}
