//! Saved model artifact
//!
//! Layout of an artifact directory:
//!
//! ```text
//! <dir>/model.json    graph description, class names, preprocessing
//! <dir>/model.mpk     parameters (named MessagePack, full precision)
//! <dir>/history.json  baseline and per-epoch metrics
//! ```
//!
//! Saving replaces whatever was in the directory before.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::preprocess::Preprocessing;
use super::transfer::{TransferModel, TransferModelConfig};
use crate::utils::error::{Result, TransferError};
use crate::utils::metrics::TrainingHistory;

pub const MANIFEST_FILE: &str = "model.json";
pub const WEIGHTS_STEM: &str = "model";
pub const HISTORY_FILE: &str = "history.json";

/// Description of a saved model, enough to rebuild its graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub crate_version: String,
    pub created_at: String,
    pub model: TransferModelConfig,
    /// Class names, indexed by label
    pub class_names: Vec<String>,
    pub preprocessing: Preprocessing,
}

impl ArtifactManifest {
    pub fn new(
        model: TransferModelConfig,
        class_names: Vec<String>,
        preprocessing: Preprocessing,
    ) -> Self {
        Self {
            crate_version: crate::VERSION.to_string(),
            created_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            model,
            class_names,
            preprocessing,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.class_names.len() != self.model.num_classes {
            return Err(TransferError::Model(format!(
                "Manifest lists {} class names for a model with {} outputs",
                self.class_names.len(),
                self.model.num_classes
            )));
        }
        Ok(())
    }
}

/// A model restored from disk with its manifest
#[derive(Debug)]
pub struct LoadedArtifact<B: Backend> {
    pub manifest: ArtifactManifest,
    pub model: TransferModel<B>,
}

/// Write `model` and its manifest (and history, if any) to `dir`
pub fn save_artifact<B: Backend>(
    dir: &Path,
    model: &TransferModel<B>,
    manifest: &ArtifactManifest,
    history: Option<&TrainingHistory>,
) -> Result<PathBuf> {
    manifest.validate()?;
    if model.num_classes() != manifest.model.num_classes {
        return Err(TransferError::Model(format!(
            "Model has {} outputs but manifest describes {}",
            model.num_classes(),
            manifest.model.num_classes
        )));
    }

    if dir.exists() {
        debug!("Removing previous artifact at {:?}", dir);
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;

    fs::write(
        dir.join(MANIFEST_FILE),
        serde_json::to_string_pretty(manifest)?,
    )?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model.clone().save_file(dir.join(WEIGHTS_STEM), &recorder)?;

    if let Some(history) = history {
        fs::write(dir.join(HISTORY_FILE), serde_json::to_string_pretty(history)?)?;
    }

    info!("Saved model artifact to {:?}", dir);
    Ok(dir.to_path_buf())
}

pub fn read_manifest(dir: &Path) -> Result<ArtifactManifest> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(TransferError::Model(format!(
            "No model manifest at {:?}",
            path
        )));
    }
    let manifest: ArtifactManifest = serde_json::from_str(&fs::read_to_string(path)?)?;
    manifest.validate()?;
    Ok(manifest)
}

pub fn read_history(dir: &Path) -> Result<TrainingHistory> {
    let json = fs::read_to_string(dir.join(HISTORY_FILE))?;
    Ok(serde_json::from_str(&json)?)
}

/// Rebuild the model described by the manifest and load its parameters
pub fn load_artifact<B: Backend>(dir: &Path, device: &B::Device) -> Result<LoadedArtifact<B>> {
    let manifest = read_manifest(dir)?;
    if manifest.crate_version != crate::VERSION {
        debug!(
            "Artifact written by version {}, running {}",
            manifest.crate_version,
            crate::VERSION
        );
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let model = manifest
        .model
        .init::<B>(device)?
        .load_file(dir.join(WEIGHTS_STEM), &recorder, device)?;

    // Loaded parameters track gradients again; restore the frozen state
    let model = if manifest.model.freeze_backbone {
        model.freeze_backbone()
    } else {
        model
    };

    info!(
        "Loaded model artifact from {:?} ({} classes)",
        dir,
        manifest.class_names.len()
    );
    Ok(LoadedArtifact { manifest, model })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::backbone::VggBackboneConfig;
    use crate::model::head::HeadConfig;
    use crate::utils::metrics::EvalMetrics;
    use burn::tensor::{Distribution, Tensor};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn tiny_config() -> TransferModelConfig {
        TransferModelConfig::new(2)
            .with_image_size(8)
            .with_backbone(VggBackboneConfig {
                in_channels: 3,
                blocks: vec![vec![4]],
            })
            .with_head(HeadConfig {
                hidden_units: vec![5],
                ..Default::default()
            })
    }

    fn manifest() -> ArtifactManifest {
        ArtifactManifest::new(
            tiny_config(),
            vec!["cats".into(), "dogs".into()],
            Preprocessing::ImageNet,
        )
    }

    #[test]
    fn test_round_trip_reproduces_logits() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("vgg_transfer");

        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let input = Tensor::<TestBackend, 4>::random([3, 3, 8, 8], Distribution::Default, &device);
        let expected: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();

        let history = TrainingHistory {
            baseline: Some(EvalMetrics {
                loss: 0.7,
                accuracy: 0.5,
                samples: 4,
            }),
            epochs: vec![],
        };
        save_artifact(&artifact_dir, &model, &manifest(), Some(&history)).unwrap();

        let loaded = load_artifact::<TestBackend>(&artifact_dir, &device).unwrap();
        let actual: Vec<f32> = loaded.model.forward(input).into_data().to_vec().unwrap();

        assert_eq!(loaded.manifest.class_names, vec!["cats", "dogs"]);
        assert!(loaded.model.is_frozen());
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-5);
        }
        assert_eq!(read_history(&artifact_dir).unwrap().baseline.unwrap().samples, 4);
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("out");
        fs::create_dir_all(&artifact_dir).unwrap();
        fs::write(artifact_dir.join("stale.txt"), "old").unwrap();

        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        save_artifact(&artifact_dir, &model, &manifest(), None).unwrap();

        assert!(!artifact_dir.join("stale.txt").exists());
        assert!(artifact_dir.join(MANIFEST_FILE).is_file());
        assert!(artifact_dir.join("model.mpk").is_file());
        assert!(!artifact_dir.join(HISTORY_FILE).exists());
    }

    #[test]
    fn test_class_name_mismatch_is_rejected() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let classes = vec!["only".to_string()];
        let bad = ArtifactManifest::new(tiny_config(), classes, Preprocessing::ImageNet);

        assert!(save_artifact(dir.path(), &model, &bad, None).is_err());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_artifact::<TestBackend>(dir.path(), &Default::default()).unwrap_err();
        assert!(matches!(err, TransferError::Model(_)));
    }
}
