//! Trainable classification head
//!
//! Flattens the backbone's feature map and maps it to one logit per class
//! through zero or more hidden dense layers.

use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig, Relu},
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, TransferError};

/// Activation applied after every hidden dense layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadActivation {
    /// No activation (plain affine layer)
    Identity,
    Relu,
}

impl Default for HeadActivation {
    fn default() -> Self {
        Self::Identity
    }
}

impl std::fmt::Display for HeadActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeadActivation::Identity => write!(f, "identity"),
            HeadActivation::Relu => write!(f, "relu"),
        }
    }
}

/// Configuration for the classification head
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadConfig {
    /// Units of each hidden dense layer, in order
    pub hidden_units: Vec<usize>,

    /// Activation after each hidden layer
    pub activation: HeadActivation,

    /// Dropout rate after each hidden layer (0.0 disables it)
    pub dropout: f64,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            hidden_units: vec![512],
            activation: HeadActivation::Identity,
            dropout: 0.0,
        }
    }
}

impl HeadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_units.iter().any(|&u| u == 0) {
            return Err(TransferError::Config("hidden_units must all be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TransferError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Parameter count of each dense layer, hidden layers first
    pub fn layer_params(&self, in_features: usize, num_classes: usize) -> Vec<usize> {
        let mut d_in = in_features;
        let mut params = Vec::with_capacity(self.hidden_units.len() + 1);
        for &units in &self.hidden_units {
            params.push(d_in * units + units);
            d_in = units;
        }
        params.push(d_in * num_classes + num_classes);
        params
    }

    /// Build the head for `in_features` flattened inputs
    pub fn init<B: Backend>(
        &self,
        in_features: usize,
        num_classes: usize,
        device: &B::Device,
    ) -> ClassificationHead<B> {
        let mut d_in = in_features;
        let hidden = self
            .hidden_units
            .iter()
            .map(|&units| {
                let layer = xavier_linear(d_in, units, device);
                d_in = units;
                layer
            })
            .collect();

        ClassificationHead {
            hidden,
            activation: match self.activation {
                HeadActivation::Relu => Some(Relu::new()),
                HeadActivation::Identity => None,
            },
            dropout: DropoutConfig::new(self.dropout).init(),
            output: xavier_linear(d_in, num_classes, device),
        }
    }
}

fn xavier_linear<B: Backend>(d_in: usize, d_out: usize, device: &B::Device) -> Linear<B> {
    LinearConfig::new(d_in, d_out)
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device)
}

/// Flatten → hidden dense layers → logits
#[derive(Module, Debug)]
pub struct ClassificationHead<B: Backend> {
    pub hidden: Vec<Linear<B>>,
    pub activation: Option<Relu>,
    pub dropout: Dropout,
    pub output: Linear<B>,
}

impl<B: Backend> ClassificationHead<B> {
    /// Map a `[N, C, H, W]` feature map to `[N, num_classes]` logits
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, channels, height, width] = features.dims();
        let x = features.reshape([batch_size, channels * height * width]);

        let x = self.hidden.iter().fold(x, |x, layer| {
            let x = layer.forward(x);
            let x = match &self.activation {
                Some(relu) => relu.forward(x),
                None => x,
            };
            self.dropout.forward(x)
        });

        self.output.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        let [_, d_out] = self.output.weight.val().dims();
        d_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_default_matches_single_dense_layer() {
        let config = HeadConfig::default();
        assert_eq!(config.hidden_units, vec![512]);
        assert_eq!(config.activation, HeadActivation::Identity);
        assert_eq!(config.layer_params(25088, 102), vec![25088 * 512 + 512, 512 * 102 + 102]);
    }

    #[test]
    fn test_forward_output_shape() {
        let device = Default::default();
        let config = HeadConfig {
            hidden_units: vec![6],
            activation: HeadActivation::Relu,
            dropout: 0.0,
        };
        let head = config.init::<TestBackend>(8 * 2 * 2, 3, &device);

        let features = Tensor::<TestBackend, 4>::ones([5, 8, 2, 2], &device);
        let logits = head.forward(features);

        assert_eq!(logits.dims(), [5, 3]);
        assert_eq!(head.num_classes(), 3);
        assert_eq!(head.num_params(), config.layer_params(32, 3).iter().sum::<usize>());
    }

    #[test]
    fn test_no_hidden_layers() {
        let device = Default::default();
        let config = HeadConfig {
            hidden_units: vec![],
            ..Default::default()
        };
        let head = config.init::<TestBackend>(4, 2, &device);
        let logits = head.forward(Tensor::<TestBackend, 4>::zeros([1, 4, 1, 1], &device));
        assert_eq!(logits.dims(), [1, 2]);
    }

    #[test]
    fn test_validate_rejects_bad_dropout() {
        let config = HeadConfig {
            dropout: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(HeadConfig::default().validate().is_ok());
    }
}
