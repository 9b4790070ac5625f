//! Inference module for prediction with a saved model

pub mod predictor;

pub use predictor::{collect_image_paths, PredictionResult, Predictor};

/// Default number of classes shown per image
pub const DEFAULT_TOP_K: usize = 5;
