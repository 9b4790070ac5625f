//! Model module
//!
//! - `preprocess`: pixel scaling/normalization applied at batch time
//! - `backbone`: VGG feature extractor and pretrained weight loading
//! - `head`: trainable classification head
//! - `transfer`: assembled model and its summary
//! - `artifact`: saving and restoring trained models

pub mod artifact;
pub mod backbone;
pub mod head;
pub mod preprocess;
pub mod transfer;

pub use artifact::{load_artifact, save_artifact, ArtifactManifest, LoadedArtifact};
pub use backbone::{BackboneWeights, VggBackbone, VggBackboneConfig};
pub use head::{ClassificationHead, HeadActivation, HeadConfig};
pub use preprocess::Preprocessing;
pub use transfer::{ModelSummary, TransferModel, TransferModelConfig};
