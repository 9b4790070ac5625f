//! VGG feature extractor
//!
//! Stacks of 3x3 convolutions (padding 1, ReLU) grouped into blocks, each
//! block closed by a 2x2/stride 2 max pool. With the VGG16 layout a
//! `[N, 3, 224, 224]` input yields a `[N, 512, 7, 7]` feature map.
//!
//! Pretrained weights are read from a torchvision `vgg16` state dict. Its
//! `features.N.*` keys are numbered over the whole `nn.Sequential`
//! (convolutions, ReLUs and pools), so they are remapped onto the
//! block/conv structure used here.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::MaxPool2dConfig,
        PaddingConfig2d,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::{activation::relu, backend::Backend, Tensor},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::error::{Result, TransferError};

/// Layout of a VGG-style backbone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VggBackboneConfig {
    /// Number of input channels (3 for RGB)
    pub in_channels: usize,
    /// Output channels of every convolution, grouped by block
    pub blocks: Vec<Vec<usize>>,
}

impl Default for VggBackboneConfig {
    fn default() -> Self {
        Self::vgg16()
    }
}

impl VggBackboneConfig {
    /// The 13-convolution VGG16 feature extractor
    pub fn vgg16() -> Self {
        Self {
            in_channels: 3,
            blocks: vec![
                vec![64, 64],
                vec![128, 128],
                vec![256, 256, 256],
                vec![512, 512, 512],
                vec![512, 512, 512],
            ],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 {
            return Err(TransferError::Config("backbone in_channels must be > 0".into()));
        }
        if self.blocks.is_empty() || self.blocks.iter().any(|b| b.is_empty()) {
            return Err(TransferError::Config(
                "backbone needs at least one block and every block at least one conv".into(),
            ));
        }
        if self.blocks.iter().flatten().any(|&c| c == 0) {
            return Err(TransferError::Config("conv channels must be > 0".into()));
        }
        Ok(())
    }

    /// Channels of the final feature map
    pub fn out_channels(&self) -> usize {
        self.blocks
            .last()
            .and_then(|b| b.last())
            .copied()
            .unwrap_or(self.in_channels)
    }

    /// Total spatial downsampling factor (one 2x pool per block)
    pub fn downsampling(&self) -> usize {
        1 << self.blocks.len()
    }

    /// Spatial size of the feature map for a square input
    pub fn output_size(&self, image_size: usize) -> usize {
        self.blocks.iter().fold(image_size, |size, _| size / 2)
    }

    /// `[channels, height, width]` of the feature map for a square input
    pub fn output_shape(&self, image_size: usize) -> [usize; 3] {
        let size = self.output_size(image_size);
        [self.out_channels(), size, size]
    }

    pub fn num_convs(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }

    /// Build the backbone with freshly initialized weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> VggBackbone<B> {
        let mut in_channels = self.in_channels;
        let blocks = self
            .blocks
            .iter()
            .map(|channels| {
                let convs = channels
                    .iter()
                    .map(|&out_channels| {
                        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
                            .with_padding(PaddingConfig2d::Explicit(1, 1))
                            .init(device);
                        in_channels = out_channels;
                        conv
                    })
                    .collect();
                VggBlock { convs }
            })
            .collect();

        VggBackbone { blocks }
    }
}

/// Source of the backbone parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum BackboneWeights {
    /// Random initialization (no transfer)
    Random,
    /// torchvision VGG state dict (`.pth`)
    #[serde(rename = "pytorch")]
    PyTorch(PathBuf),
    /// Record written by this crate's named MessagePack recorder
    Burn(PathBuf),
}

impl Default for BackboneWeights {
    fn default() -> Self {
        BackboneWeights::PyTorch(PathBuf::from(crate::PRETRAINED_WEIGHTS))
    }
}

impl BackboneWeights {
    /// Pick the loader from the file extension (`.pth`/`.pt` → PyTorch)
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match path.extension().and_then(|e| e.to_str()) {
            Some("pth") | Some("pt") => BackboneWeights::PyTorch(path),
            _ => BackboneWeights::Burn(path),
        }
    }

    pub fn is_pretrained(&self) -> bool {
        !matches!(self, BackboneWeights::Random)
    }

    /// Error with `TransferError::Record` when the weights file is missing
    pub fn ensure_available(&self) -> Result<()> {
        match self {
            BackboneWeights::Random => Ok(()),
            BackboneWeights::PyTorch(path) | BackboneWeights::Burn(path) if !path.is_file() => {
                Err(TransferError::Record(format!(
                    "Pretrained weights not found: {:?}",
                    path
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Consecutive convolutions sharing one spatial resolution
#[derive(Module, Debug)]
pub struct VggBlock<B: Backend> {
    pub convs: Vec<Conv2d<B>>,
}

impl<B: Backend> VggBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .convs
            .iter()
            .fold(x, |x, conv| relu(conv.forward(x)));

        MaxPool2dConfig::new([2, 2])
            .with_strides([2, 2])
            .init()
            .forward(x)
    }
}

/// VGG convolutional feature extractor
#[derive(Module, Debug)]
pub struct VggBackbone<B: Backend> {
    pub blocks: Vec<VggBlock<B>>,
}

impl<B: Backend> VggBackbone<B> {
    /// `[N, C, H, W]` images to `[N, C_last, H / 2^b, W / 2^b]` features
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    /// Replace the parameters with the ones described by `weights`
    pub fn load_weights(
        self,
        weights: &BackboneWeights,
        config: &VggBackboneConfig,
        device: &B::Device,
    ) -> Result<Self> {
        match weights {
            BackboneWeights::Random => Ok(self),
            BackboneWeights::PyTorch(path) => self.load_pytorch(path, config, device),
            BackboneWeights::Burn(path) => {
                weights.ensure_available()?;
                info!("Loading backbone record from {:?}", path);
                let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
                Ok(self.load_file(path.clone(), &recorder, device)?)
            }
        }
    }

    /// Load a torchvision VGG state dict
    pub fn load_pytorch(
        self,
        path: &Path,
        config: &VggBackboneConfig,
        device: &B::Device,
    ) -> Result<Self> {
        BackboneWeights::PyTorch(path.to_path_buf()).ensure_available()?;
        info!("Loading pretrained backbone weights from {:?}", path);

        let mut args = LoadArgs::new(path.to_path_buf());
        for (pattern, replacement) in torchvision_key_remaps(config) {
            args = args.with_key_remap(&pattern, &replacement);
        }

        let record: VggBackboneRecord<B> =
            PyTorchFileRecorder::<FullPrecisionSettings>::default().load(args, device)?;

        Ok(self.load_record(record))
    }

    /// Save the backbone parameters alone (for `BackboneWeights::Burn`)
    pub fn save_weights(self, path: &Path) -> Result<()> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.save_file(path.to_path_buf(), &recorder)?;
        Ok(())
    }
}

/// Regex remaps from torchvision `features.N.*` keys to `blocks.b.convs.c.*`
pub fn torchvision_key_remaps(config: &VggBackboneConfig) -> Vec<(String, String)> {
    let mut remaps = Vec::with_capacity(config.num_convs());
    let mut index = 0;

    for (b, block) in config.blocks.iter().enumerate() {
        for c in 0..block.len() {
            remaps.push((
                format!(r"^features\.{}\.(.+)$", index),
                format!("blocks.{}.convs.{}.$1", b, c),
            ));
            // conv + relu
            index += 2;
        }
        // max pool
        index += 1;
    }

    remaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn tiny_config() -> VggBackboneConfig {
        VggBackboneConfig {
            in_channels: 3,
            blocks: vec![vec![4], vec![6, 8]],
        }
    }

    #[test]
    fn test_vgg16_layout() {
        let config = VggBackboneConfig::vgg16();
        assert_eq!(config.num_convs(), 13);
        assert_eq!(config.output_shape(224), [512, 7, 7]);
        assert_eq!(config.downsampling(), 32);
    }

    #[test]
    fn test_forward_shape_matches_config() {
        let device = Default::default();
        let config = tiny_config();
        let backbone = config.init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        let output = backbone.forward(input);

        let [c, h, w] = config.output_shape(16);
        assert_eq!(output.dims(), [2, c, h, w]);
        assert_eq!(output.dims(), [2, 8, 4, 4]);
    }

    #[test]
    fn test_param_count() {
        let device = Default::default();
        let backbone = tiny_config().init::<TestBackend>(&device);
        // (3*4*9 + 4) + (4*6*9 + 6) + (6*8*9 + 8)
        assert_eq!(backbone.num_params(), 112 + 222 + 440);
    }

    #[test]
    fn test_torchvision_remaps_for_vgg16() {
        let remaps = torchvision_key_remaps(&VggBackboneConfig::vgg16());
        let indices: Vec<String> = remaps
            .iter()
            .map(|(pattern, _)| {
                pattern
                    .trim_start_matches(r"^features\.")
                    .split('\\')
                    .next()
                    .unwrap()
                    .to_string()
            })
            .collect();

        assert_eq!(
            indices,
            vec!["0", "2", "5", "7", "10", "12", "14", "17", "19", "21", "24", "26", "28"]
        );
        assert_eq!(remaps[4].1, "blocks.2.convs.0.$1");
        assert_eq!(remaps[12].1, "blocks.4.convs.2.$1");
    }

    #[test]
    fn test_weights_from_path() {
        assert!(matches!(
            BackboneWeights::from_path("vgg16-397923af.pth"),
            BackboneWeights::PyTorch(_)
        ));
        assert!(matches!(
            BackboneWeights::from_path("backbone.mpk"),
            BackboneWeights::Burn(_)
        ));
        assert!(!BackboneWeights::Random.is_pretrained());
        assert_eq!(
            BackboneWeights::default(),
            BackboneWeights::PyTorch(PathBuf::from(crate::PRETRAINED_WEIGHTS))
        );
    }

    #[test]
    fn test_random_weights_must_be_named() {
        let weights: BackboneWeights = serde_json::from_str(r#"{ "kind": "random" }"#).unwrap();
        assert_eq!(weights, BackboneWeights::Random);
        assert!(weights.ensure_available().is_ok());

        let missing = BackboneWeights::Burn(PathBuf::from("/no/such/backbone.mpk"));
        assert!(matches!(
            missing.ensure_available(),
            Err(TransferError::Record(_))
        ));
    }

    #[test]
    fn test_missing_pytorch_file() {
        let device = Default::default();
        let config = tiny_config();
        let backbone = config.init::<TestBackend>(&device);
        let err = backbone
            .load_pytorch(Path::new("/no/such/vgg16.pth"), &config, &device)
            .unwrap_err();
        assert!(matches!(err, TransferError::Record(_)));
    }

    fn values<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_load_torchvision_state_dict() {
        // features.0 and features.3 hold the convs of a [[2], [2]] layout;
        // classifier.0 has no counterpart in the backbone and is left unread
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/model/fixtures/tiny_vgg.pt");
        let device = Default::default();
        let config = VggBackboneConfig {
            in_channels: 3,
            blocks: vec![vec![2], vec![2]],
        };

        let backbone = config
            .init::<TestBackend>(&device)
            .load_pytorch(&path, &config, &device)
            .unwrap();

        let first = &backbone.blocks[0].convs[0];
        let second = &backbone.blocks[1].convs[0];
        assert_eq!(first.weight.val().dims(), [2, 3, 3, 3]);
        assert_eq!(second.weight.val().dims(), [2, 2, 3, 3]);

        let expected: Vec<f32> = (0..54).map(|j| j as f32 * 0.25).collect();
        assert_eq!(values(first.weight.val()), expected);
        let expected: Vec<f32> = (0..36).map(|j| j as f32 * -0.125).collect();
        assert_eq!(values(second.weight.val()), expected);

        let bias = |conv: &Conv2d<TestBackend>| values(conv.bias.as_ref().unwrap().val());
        assert_eq!(bias(first), vec![-1.0, -2.0]);
        assert_eq!(bias(second), vec![0.5, 1.5]);
    }

    #[test]
    fn test_burn_weights_round_trip() {
        let device = Default::default();
        let config = tiny_config();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backbone");

        let original = config.init::<TestBackend>(&device);
        let expected: Vec<f32> = original.blocks[0].convs[0]
            .weight
            .val()
            .into_data()
            .to_vec()
            .unwrap();
        original.save_weights(&path).unwrap();

        let loaded = config
            .init::<TestBackend>(&device)
            .load_weights(
                &BackboneWeights::Burn(path.with_extension("mpk")),
                &config,
                &device,
            )
            .unwrap();
        let actual: Vec<f32> = loaded.blocks[0].convs[0]
            .weight
            .val()
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(actual, expected);
    }
}
