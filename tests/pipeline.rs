//! End-to-end checks on a small synthetic two-class image folder

use std::collections::HashSet;
use std::path::Path;

use burn::backend::Autodiff;
use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use image::{Rgb, RgbImage};

use vgg_transfer::dataset::{ImageBatch, ImageBatcher, ImageFolderDataset, SplitConfig};
use vgg_transfer::model::artifact::{load_artifact, read_history};
use vgg_transfer::model::{BackboneWeights, Preprocessing, VggBackboneConfig};
use vgg_transfer::training::pipeline::{build_partition, load_partitions};
use vgg_transfer::training::{evaluate_artifact, run_transfer, TransferConfig};
use vgg_transfer::TransferError;

type TestBackend = NdArray;
type TestAutodiffBackend = Autodiff<NdArray>;

const IMAGE_SIZE: usize = 16;

/// Two classes of ten images each; "bright" images are light, "dark" ones dark
fn write_dataset(root: &Path) {
    for (class, base) in [("bright", 200u8), ("dark", 30u8)] {
        let dir = root.join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..10u8 {
            let img = RgbImage::from_fn(24, 20, |x, y| {
                Rgb([base + i, base.wrapping_add((x + y) as u8 % 8), base])
            });
            img.save_with_format(dir.join(format!("image_{:04}.png", i)), image::ImageFormat::Png)
                .unwrap();
        }
    }
}

fn tiny_config(data_dir: &Path, output_dir: &Path) -> TransferConfig {
    TransferConfig {
        data_dir: data_dir.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        batch_size: 4,
        image_size: IMAGE_SIZE,
        epochs: 2,
        weights: BackboneWeights::Random,
        backbone: VggBackboneConfig {
            in_channels: 3,
            blocks: vec![vec![4], vec![8]],
        },
        hidden_units: vec![8],
        ..Default::default()
    }
}

#[test]
fn discovers_classes_and_splits_deterministically() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());

    let split = SplitConfig::new(0.2, 123).unwrap();
    let (dataset, first) = load_partitions(dir.path(), &split).unwrap();
    let (_, second) = load_partitions(dir.path(), &split).unwrap();

    assert_eq!(dataset.class_names, vec!["bright", "dark"]);
    assert_eq!(first.training.len(), 16);
    assert_eq!(first.validation.len(), 4);
    assert_eq!(first.training, second.training);
    assert_eq!(first.validation, second.validation);

    let train: HashSet<_> = first.training.iter().map(|s| s.path.clone()).collect();
    let valid: HashSet<_> = first.validation.iter().map(|s| s.path.clone()).collect();
    assert!(train.is_disjoint(&valid));
    assert_eq!(train.len() + valid.len(), 20);

    assert!(first
        .training
        .iter()
        .chain(first.validation.iter())
        .all(|s| s.label < dataset.num_classes()));
}

#[test]
fn different_seeds_give_different_splits() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());

    let (_, a) = load_partitions(dir.path(), &SplitConfig::new(0.2, 123).unwrap()).unwrap();
    let (_, b) = load_partitions(dir.path(), &SplitConfig::new(0.2, 7).unwrap()).unwrap();
    assert_ne!(a.validation, b.validation);
}

#[test]
fn missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(ImageFolderDataset::new(dir.path().join("nope")).is_err());
    assert!(ImageFolderDataset::new(dir.path()).is_err());
}

#[test]
fn default_run_requires_pretrained_weights() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_dataset(data.path());
    let artifact_dir = out.path().join("vgg_transfer");

    let config = TransferConfig {
        data_dir: data.path().to_path_buf(),
        output_dir: artifact_dir.clone(),
        weights: BackboneWeights::PyTorch(data.path().join("vgg16-397923af.pth")),
        ..Default::default()
    };
    assert_eq!(
        TransferConfig::default().weights,
        BackboneWeights::PyTorch(vgg_transfer::PRETRAINED_WEIGHTS.into())
    );

    let err = run_transfer::<TestAutodiffBackend>(&config, &Default::default()).unwrap_err();
    assert!(matches!(err, TransferError::Record(_)), "{:?}", err);
    assert!(!artifact_dir.exists());
}

#[test]
fn full_run_trains_saves_and_reloads() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_dataset(data.path());
    let artifact_dir = out.path().join("vgg_transfer");
    let config = tiny_config(data.path(), &artifact_dir);
    let device = Default::default();

    let outcome = run_transfer::<TestAutodiffBackend>(&config, &device).unwrap();

    assert_eq!(outcome.class_names.len(), 2);
    assert_eq!(outcome.train_samples, 16);
    assert_eq!(outcome.val_samples, 4);
    assert_eq!(outcome.baseline.samples, 4);
    assert_eq!(outcome.history.epochs.len(), 2);
    assert!(outcome.history.epochs.iter().all(|e| e.loss.is_finite()));

    let history = read_history(&artifact_dir).unwrap();
    assert_eq!(history.epochs.len(), 2);
    assert!(history.baseline.is_some());

    let loaded = load_artifact::<TestBackend>(&artifact_dir, &device).unwrap();
    assert_eq!(loaded.manifest.class_names, vec!["bright", "dark"]);
    assert_eq!(loaded.manifest.preprocessing, Preprocessing::ImageNet);
    assert!(loaded.model.is_frozen());

    let logits = loaded
        .model
        .forward(Tensor::zeros([3, 3, IMAGE_SIZE, IMAGE_SIZE], &device));
    assert_eq!(logits.dims(), [3, 2]);

    let metrics = evaluate_artifact::<TestBackend>(
        &artifact_dir,
        data.path(),
        &config.split_config(),
        4,
        &device,
    )
    .unwrap();
    assert_eq!(metrics.samples, 4);
}

#[test]
fn backbone_is_unchanged_by_training_and_round_trip_matches() {
    use vgg_transfer::model::artifact::{save_artifact, ArtifactManifest};
    use vgg_transfer::training::{adam, Trainer, TrainerSettings};

    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_dataset(data.path());
    let config = tiny_config(data.path(), &out.path().join("model"));
    let device = Default::default();

    let (dataset, partitions) = load_partitions(data.path(), &config.split_config()).unwrap();
    let train = build_partition(&partitions.training, IMAGE_SIZE, true).unwrap();
    let valid = build_partition(&partitions.validation, IMAGE_SIZE, false).unwrap();

    let model_config = config.model_config(dataset.num_classes());
    let model = model_config.init::<TestAutodiffBackend>(&device).unwrap();
    let backbone_before = model.backbone.clone().valid();

    let settings = TrainerSettings {
        batch_size: config.batch_size,
        image_size: IMAGE_SIZE,
        ..Default::default()
    };
    let mut trainer = Trainer::new(model, adam::<TestAutodiffBackend>(), settings, device);
    trainer.fit(&train, &valid, 2).unwrap();
    let trained = trainer.into_model();

    let input = Tensor::<TestBackend, 4>::ones([2, 3, IMAGE_SIZE, IMAGE_SIZE], &device);
    let before: Vec<f32> = backbone_before
        .forward(input.clone())
        .into_data()
        .to_vec()
        .unwrap();
    let after: Vec<f32> = trained
        .backbone
        .clone()
        .valid()
        .forward(input)
        .into_data()
        .to_vec()
        .unwrap();
    assert_eq!(before, after);

    // Logits of the in-memory model and the reloaded artifact agree
    let manifest = ArtifactManifest::new(
        model_config,
        dataset.class_names.clone(),
        Preprocessing::ImageNet,
    );
    let artifact_dir = out.path().join("model");
    save_artifact(&artifact_dir, &trained, &manifest, None).unwrap();
    let loaded = load_artifact::<TestBackend>(&artifact_dir, &device).unwrap();

    let items = valid.get_batch(&[0, 1, 2, 3]).unwrap();
    let batcher = ImageBatcher::new(IMAGE_SIZE as u32, Preprocessing::ImageNet);
    let batch: ImageBatch<TestBackend> = batcher.batch(items, &device);

    let expected: Vec<f32> = trained
        .valid()
        .forward(batch.images.clone())
        .into_data()
        .to_vec()
        .unwrap();
    let actual: Vec<f32> = loaded.model.forward(batch.images).into_data().to_vec().unwrap();
    assert_eq!(expected.len(), 8);
    for (e, a) in expected.iter().zip(actual.iter()) {
        assert!((e - a).abs() < 1e-5, "{} vs {}", e, a);
    }
}
