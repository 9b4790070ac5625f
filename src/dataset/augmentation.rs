//! Data Augmentation Module
//!
//! Random horizontal flip and random rotation, applied per item when a
//! training batch is assembled. Validation batches are never augmented.
//!
//! Rotation samples source pixels with bilinear interpolation; pixels that
//! fall outside the image are mirrored back in (reflect fill).

use image::{Rgb, RgbImage};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for data augmentation
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Probability of applying a horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Maximum rotation as a fraction of a full turn; angles are drawn
    /// uniformly from `±rotation_factor * 360°`
    pub rotation_factor: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            rotation_factor: 0.2,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            rotation_factor: 0.0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.horizontal_flip_prob <= 0.0 && self.rotation_factor <= 0.0
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    /// Apply the configured augmentations to one image
    pub fn augment<R: Rng>(&self, img: RgbImage, rng: &mut R) -> RgbImage {
        let mut result = img;

        if self.config.horizontal_flip_prob > 0.0
            && rng.gen::<f32>() < self.config.horizontal_flip_prob
        {
            result = image::imageops::flip_horizontal(&result);
        }

        if self.config.rotation_factor > 0.0 {
            let max_degrees = self.config.rotation_factor * 360.0;
            let angle = rng.gen_range(-max_degrees..=max_degrees);
            result = rotate(&result, angle);
        }

        result
    }
}

/// Rotate an image around its center by `angle_degrees` (counter-clockwise)
pub fn rotate(img: &RgbImage, angle_degrees: f32) -> RgbImage {
    if angle_degrees.abs() < 0.1 {
        return img.clone();
    }

    let angle_rad = angle_degrees.to_radians();
    let (width, height) = img.dimensions();

    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let cos_a = angle_rad.cos();
    let sin_a = angle_rad.sin();

    let mut output = RgbImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;

            let src_x = cx + dx * cos_a + dy * sin_a;
            let src_y = cy - dx * sin_a + dy * cos_a;

            output.put_pixel(x, y, bilinear_sample(img, src_x, src_y));
        }
    }

    output
}

/// Mirror a coordinate into `[0, size - 1]`
fn reflect(coord: f32, size: u32) -> f32 {
    let max = (size as f32 - 1.0).max(0.0);
    if max == 0.0 {
        return 0.0;
    }

    let period = 2.0 * max;
    let mut c = coord.rem_euclid(period);
    if c > max {
        c = period - c;
    }
    c
}

/// Sample a pixel using bilinear interpolation with reflect fill
fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let x = reflect(x, width);
    let y = reflect(y, height);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;

        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}
