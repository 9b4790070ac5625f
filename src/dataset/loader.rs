//! Image folder dataset loader
//!
//! Scans a directory where every subdirectory is a class and every
//! supported image file inside it is one sample of that class.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::split::{split_samples, DatasetSplit, SplitConfig};
use crate::utils::error::{Result, TransferError};

/// File extensions accepted as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 5] = ["bmp", "gif", "jpeg", "jpg", "png"];

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Index into the sorted class name list
    pub label: usize,
}

/// Directory-backed dataset: class names plus every sample found
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    /// Root directory of the dataset
    pub root_dir: PathBuf,
    /// Class names, sorted; position is the label
    pub class_names: Vec<String>,
    /// All samples, grouped by class and sorted by path within a class
    pub samples: Vec<ImageSample>,
}

impl ImageFolderDataset {
    /// Scan `root_dir` for class subdirectories and their images
    ///
    /// ```text
    /// root_dir/
    /// ├── accordion/
    /// │   ├── image_0001.jpg
    /// │   └── image_0002.jpg
    /// ├── airplanes/
    /// │   └── ...
    /// └── ...
    /// ```
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Scanning image folder: {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(TransferError::DatasetNotFound(root_dir));
        }

        let mut class_names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                warn!("Skipping symlink {:?}; links are not followed", entry.path());
                continue;
            }
            if !file_type.is_dir() {
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) if name.starts_with('.') => {}
                Some(name) => class_names.push(name.to_string()),
                None => warn!("Skipping directory with a non UTF-8 name: {:?}", entry.path()),
            }
        }
        class_names.sort();

        if class_names.is_empty() {
            return Err(TransferError::NoClasses(root_dir));
        }

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let mut class_files: Vec<PathBuf> = WalkDir::new(root_dir.join(class_name))
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| is_image_file(p))
                .collect();
            class_files.sort();

            debug!(
                "Class '{}' (label {}): {} images",
                class_name,
                label,
                class_files.len()
            );

            samples.extend(class_files.into_iter().map(|path| ImageSample { path, label }));
        }

        if samples.is_empty() {
            return Err(TransferError::NoImages(root_dir));
        }

        info!(
            "Found {} files belonging to {} classes",
            samples.len(),
            class_names.len()
        );

        Ok(Self {
            root_dir,
            class_names,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Partition the samples into training and validation subsets
    pub fn split(&self, config: &SplitConfig) -> Result<DatasetSplit<ImageSample>> {
        let split = split_samples(&self.samples, config)?;
        info!(
            "Using {} files for training, {} files for validation",
            split.training.len(),
            split.validation.len()
        );
        Ok(split)
    }

    pub fn get_stats(&self) -> DatasetStats {
        let mut class_counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }

        DatasetStats {
            total_samples: self.samples.len(),
            class_names: self.class_names.clone(),
            class_counts,
        }
    }
}

/// Whether the path carries one of the supported image extensions
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decode an image file to RGB8 and resize it to `image_size` × `image_size`
pub fn load_rgb_image(path: &Path, image_size: u32) -> Result<RgbImage> {
    let img = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|source| TransferError::ImageDecode {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(img
        .resize_exact(image_size, image_size, FilterType::Triangle)
        .to_rgb8())
}

/// Statistics about the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub class_names: Vec<String>,
    pub class_counts: Vec<usize>,
}

impl DatasetStats {
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Print per-class counts with a proportional bar
    pub fn print(&self) {
        println!("\nDataset Statistics:");
        println!("  Total samples: {}", self.total_samples);
        println!("  Number of classes: {}", self.num_classes());
        println!("\n  Samples per class:");

        let max_count = self.class_counts.iter().copied().max().unwrap_or(1).max(1);
        for (idx, (name, count)) in self.class_names.iter().zip(&self.class_counts).enumerate() {
            let bar_len = (*count as f32 / max_count as f32 * 30.0) as usize;
            println!("    {:3}. {:30} {:5} {}", idx, name, count, "█".repeat(bar_len));
        }
    }
}
