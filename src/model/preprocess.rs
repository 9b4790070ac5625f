//! Pixel preprocessing
//!
//! Stateless elementwise mapping from raw 0-255 pixel values to the range
//! the backbone was pretrained on. Applied to whole batch tensors when a
//! batch is assembled, so cached items always hold raw pixels.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// ImageNet channel means (RGB, on the 0-1 scale)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations (RGB, on the 0-1 scale)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Preprocessing {
    /// Multiply every value by `scale` (e.g. `1/255` for a 0-1 range)
    Rescale { scale: f32 },
    /// Scale to 0-1, then standardize each channel with ImageNet statistics
    ImageNet,
}

impl Default for Preprocessing {
    fn default() -> Self {
        Preprocessing::ImageNet
    }
}

impl Preprocessing {
    /// Plain `1/255` rescaling
    pub fn unit_range() -> Self {
        Preprocessing::Rescale { scale: 1.0 / 255.0 }
    }

    /// Apply to a `[N, 3, H, W]` tensor of raw pixel values
    pub fn apply<B: Backend>(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Preprocessing::Rescale { scale } => images.mul_scalar(*scale),
            Preprocessing::ImageNet => {
                let device = images.device();
                let mean = Tensor::<B, 4>::from_floats(
                    TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]),
                    &device,
                );
                let std = Tensor::<B, 4>::from_floats(
                    TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]),
                    &device,
                );
                (images.div_scalar(255.0) - mean) / std
            }
        }
    }

    /// Apply to a single raw value of the given channel
    pub fn apply_value(&self, value: f32, channel: usize) -> f32 {
        match self {
            Preprocessing::Rescale { scale } => value * scale,
            Preprocessing::ImageNet => {
                (value / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
            }
        }
    }
}

impl std::fmt::Display for Preprocessing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Preprocessing::Rescale { scale } => write!(f, "rescale(x * {:.6})", scale),
            Preprocessing::ImageNet => write!(f, "imagenet(x / 255, mean/std)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_rescale_maps_255_to_one() {
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::full([1, 3, 2, 2], 255.0, &device);
        let out = Preprocessing::unit_range().apply(images);
        let values: Vec<f32> = out.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_imagenet_matches_scalar_path() {
        let device = Default::default();
        let raw: Vec<f32> = (0..12).map(|i| (i * 20) as f32).collect();
        let images = Tensor::<TestBackend, 4>::from_floats(
            TensorData::new(raw.clone(), [1, 3, 2, 2]),
            &device,
        );
        let out: Vec<f32> = Preprocessing::ImageNet
            .apply(images)
            .into_data()
            .to_vec()
            .unwrap();

        for (i, value) in raw.iter().enumerate() {
            let expected = Preprocessing::ImageNet.apply_value(*value, i / 4);
            assert!((out[i] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_preprocessing_serde() {
        let json = serde_json::to_string(&Preprocessing::unit_range()).unwrap();
        assert!(json.contains("\"kind\":\"rescale\""));
        let back: Preprocessing = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Preprocessing::unit_range());
    }
}
