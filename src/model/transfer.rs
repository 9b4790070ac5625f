//! Assembled transfer-learning model
//!
//! A VGG backbone (frozen by default) followed by a trainable
//! classification head. The output size is fixed at construction time to
//! the number of discovered classes.

use burn::{
    module::Module,
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use super::backbone::{BackboneWeights, VggBackbone, VggBackboneConfig};
use super::head::{ClassificationHead, HeadConfig};
use crate::utils::error::{Result, TransferError};
use crate::utils::format_number;

/// Everything needed to rebuild the model graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferModelConfig {
    /// Input image size (square)
    pub image_size: usize,

    /// Number of output logits
    pub num_classes: usize,

    pub backbone: VggBackboneConfig,

    pub head: HeadConfig,

    /// Exclude backbone parameters from gradient updates
    pub freeze_backbone: bool,
}

impl TransferModelConfig {
    /// VGG16 backbone and the default head for `num_classes` outputs
    pub fn new(num_classes: usize) -> Self {
        Self {
            image_size: crate::IMAGE_SIZE,
            num_classes,
            backbone: VggBackboneConfig::vgg16(),
            head: HeadConfig::default(),
            freeze_backbone: true,
        }
    }

    pub fn with_image_size(mut self, image_size: usize) -> Self {
        self.image_size = image_size;
        self
    }

    pub fn with_backbone(mut self, backbone: VggBackboneConfig) -> Self {
        self.backbone = backbone;
        self
    }

    pub fn with_head(mut self, head: HeadConfig) -> Self {
        self.head = head;
        self
    }

    pub fn with_freeze_backbone(mut self, freeze: bool) -> Self {
        self.freeze_backbone = freeze;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(TransferError::Config("num_classes must be > 0".into()));
        }
        self.backbone.validate()?;
        self.head.validate()?;
        if self.backbone.output_size(self.image_size) == 0 {
            return Err(TransferError::Config(format!(
                "image_size {} is smaller than the backbone downsampling factor {}",
                self.image_size,
                self.backbone.downsampling()
            )));
        }
        Ok(())
    }

    /// Length of the flattened feature vector fed to the head
    pub fn feature_size(&self) -> usize {
        let [c, h, w] = self.backbone.output_shape(self.image_size);
        c * h * w
    }

    /// Build the model with randomly initialized backbone and head
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<TransferModel<B>> {
        self.init_with_weights(&BackboneWeights::Random, device)
    }

    /// Build the model, loading backbone parameters from `weights`
    pub fn init_with_weights<B: Backend>(
        &self,
        weights: &BackboneWeights,
        device: &B::Device,
    ) -> Result<TransferModel<B>> {
        self.validate()?;

        let backbone = self
            .backbone
            .init(device)
            .load_weights(weights, &self.backbone, device)?;
        let head = self.head.init(self.feature_size(), self.num_classes, device);

        let model = TransferModel {
            backbone,
            head,
            frozen: false,
            num_classes: self.num_classes,
        };

        Ok(if self.freeze_backbone {
            model.freeze_backbone()
        } else {
            model
        })
    }
}

/// VGG backbone + classification head
#[derive(Module, Debug)]
pub struct TransferModel<B: Backend> {
    pub backbone: VggBackbone<B>,
    pub head: ClassificationHead<B>,
    frozen: bool,
    num_classes: usize,
}

impl<B: Backend> TransferModel<B> {
    /// `[N, 3, H, W]` preprocessed images to `[N, num_classes]` logits
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        let features = if self.frozen {
            features.detach()
        } else {
            features
        };
        self.head.forward(features)
    }

    /// Class probabilities, for prediction only
    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// Stop tracking gradients for every backbone parameter
    pub fn freeze_backbone(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self.frozen = true;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// One row of the printed model summary
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSummary {
    pub name: String,
    pub output_shape: Vec<usize>,
    pub params: usize,
    pub trainable: bool,
}

/// Layer table with trainable and frozen parameter totals
#[derive(Debug, Clone)]
pub struct ModelSummary {
    pub layers: Vec<LayerSummary>,
}

impl ModelSummary {
    pub fn from_config(config: &TransferModelConfig) -> Self {
        let trainable_backbone = !config.freeze_backbone;
        let mut layers = Vec::new();

        let mut channels = config.backbone.in_channels;
        let mut size = config.image_size;
        for (b, block) in config.backbone.blocks.iter().enumerate() {
            for (c, &out_channels) in block.iter().enumerate() {
                layers.push(LayerSummary {
                    name: format!("block{}_conv{}", b + 1, c + 1),
                    output_shape: vec![out_channels, size, size],
                    params: channels * out_channels * 9 + out_channels,
                    trainable: trainable_backbone,
                });
                channels = out_channels;
            }
            size /= 2;
            layers.push(LayerSummary {
                name: format!("block{}_pool", b + 1),
                output_shape: vec![channels, size, size],
                params: 0,
                trainable: trainable_backbone,
            });
        }

        let features = config.feature_size();
        layers.push(LayerSummary {
            name: "flatten".into(),
            output_shape: vec![features],
            params: 0,
            trainable: true,
        });

        let params = config.head.layer_params(features, config.num_classes);
        for (i, &units) in config.head.hidden_units.iter().enumerate() {
            layers.push(LayerSummary {
                name: format!("dense_{}", i + 1),
                output_shape: vec![units],
                params: params[i],
                trainable: true,
            });
        }
        layers.push(LayerSummary {
            name: "logits".into(),
            output_shape: vec![config.num_classes],
            params: params[params.len() - 1],
            trainable: true,
        });

        Self { layers }
    }

    pub fn total_params(&self) -> usize {
        self.layers.iter().map(|l| l.params).sum()
    }

    pub fn trainable_params(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| l.trainable)
            .map(|l| l.params)
            .sum()
    }

    pub fn non_trainable_params(&self) -> usize {
        self.total_params() - self.trainable_params()
    }
}

impl std::fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rule = "-".repeat(64);
        writeln!(f, "{:<20} {:<22} {:>14} {:>5}", "Layer", "Output Shape", "Param #", "Train")?;
        writeln!(f, "{}", rule)?;
        for layer in &self.layers {
            let shape = layer
                .output_shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                f,
                "{:<20} {:<22} {:>14} {:>5}",
                layer.name,
                format!("(N, {})", shape),
                format_number(layer.params),
                if layer.trainable { "yes" } else { "no" }
            )?;
        }
        writeln!(f, "{}", rule)?;
        writeln!(f, "Total params:         {}", format_number(self.total_params()))?;
        writeln!(f, "Trainable params:     {}", format_number(self.trainable_params()))?;
        write!(f, "Non-trainable params: {}", format_number(self.non_trainable_params()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::optim::GradientsParams;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn tiny_config(num_classes: usize) -> TransferModelConfig {
        TransferModelConfig::new(num_classes)
            .with_image_size(16)
            .with_backbone(VggBackboneConfig {
                in_channels: 3,
                blocks: vec![vec![4], vec![8]],
            })
            .with_head(HeadConfig {
                hidden_units: vec![6],
                ..Default::default()
            })
    }

    #[test]
    fn test_output_length_equals_num_classes() {
        let device = Default::default();
        for num_classes in [2, 5] {
            let model = tiny_config(num_classes).init::<TestBackend>(&device).unwrap();
            let logits = model.forward(Tensor::zeros([3, 3, 16, 16], &device));
            assert_eq!(logits.dims(), [3, num_classes]);
            assert_eq!(model.num_classes(), num_classes);
        }
    }

    #[test]
    fn test_vgg16_feature_size() {
        assert_eq!(TransferModelConfig::new(102).feature_size(), 512 * 7 * 7);
    }

    #[test]
    fn test_summary_matches_model_params() {
        let device = Default::default();
        let config = tiny_config(3);
        let model = config.init::<TestBackend>(&device).unwrap();
        let summary = ModelSummary::from_config(&config);

        assert_eq!(summary.total_params(), model.num_params());
        assert_eq!(
            summary.non_trainable_params(),
            model.backbone.num_params()
        );
        assert_eq!(summary.trainable_params(), model.head.num_params());

        let printed = summary.to_string();
        assert!(printed.contains("block2_conv1"));
        assert!(printed.contains("logits"));
    }

    #[test]
    fn test_frozen_backbone_gets_no_gradients() {
        let device = Default::default();
        let model = tiny_config(2)
            .init::<TestAutodiffBackend>(&device)
            .unwrap();
        assert!(model.is_frozen());

        let logits = model.forward(Tensor::ones([2, 3, 16, 16], &device));
        let grads = GradientsParams::from_grads(logits.sum().backward(), &model);

        let conv_weight = &model.backbone.blocks[0].convs[0].weight;
        assert!(grads
            .get::<TestBackend, 4>(conv_weight.id)
            .is_none());
        assert!(grads
            .get::<TestBackend, 2>(model.head.output.weight.id)
            .is_some());
    }

    #[test]
    fn test_unfrozen_backbone_receives_gradients() {
        let device = Default::default();
        let model = tiny_config(2)
            .with_freeze_backbone(false)
            .init::<TestAutodiffBackend>(&device)
            .unwrap();

        let logits = model.forward(Tensor::ones([2, 3, 16, 16], &device));
        let grads = GradientsParams::from_grads(logits.sum().backward(), &model);
        assert!(grads
            .get::<TestBackend, 4>(model.backbone.blocks[0].convs[0].weight.id)
            .is_some());
    }

    #[test]
    fn test_rejects_image_smaller_than_downsampling() {
        let device = Default::default();
        let config = tiny_config(2).with_image_size(2);
        assert!(config.init::<TestBackend>(&device).is_err());
    }
}
