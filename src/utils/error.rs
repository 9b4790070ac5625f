//! Error Handling Module
//!
//! Defines the error type shared by the dataset, model and training layers.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for transfer learning operations
#[derive(Error, Debug)]
pub enum TransferError {
    /// Dataset root does not exist
    #[error("Dataset directory does not exist: {0}")]
    DatasetNotFound(PathBuf),

    /// Dataset root has no class subdirectories
    #[error("No class subdirectories found in: {0}")]
    NoClasses(PathBuf),

    /// Class subdirectories exist but hold no supported image files
    #[error("No images found in: {0}")]
    NoImages(PathBuf),

    /// Validation split outside the open interval (0, 1)
    #[error("Validation split must be in (0, 1), got {0}")]
    InvalidSplit(f64),

    /// Error decoding an image file
    #[error("Failed to decode image at '{path}': {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model construction or shape error
    #[error("Model error: {0}")]
    Model(String),

    /// Error reading or writing parameter records
    #[error("Record error: {0}")]
    Record(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<burn::record::RecorderError> for TransferError {
    fn from(err: burn::record::RecorderError) -> Self {
        TransferError::Record(format!("{:?}", err))
    }
}

/// Convenience Result type for transfer learning operations
pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransferError::InvalidSplit(1.5);
        assert_eq!(err.to_string(), "Validation split must be in (0, 1), got 1.5");

        let err = TransferError::NoClasses(PathBuf::from("/data/empty"));
        assert!(err.to_string().contains("/data/empty"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: TransferError = io_err.into();
        assert!(matches!(err, TransferError::Io(_)));
    }
}
