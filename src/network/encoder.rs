//! Pre-recurrent layers: optional conv stack, flatten and optional dense stack

use burn::{
    module::{Ignored, Module},
    nn::{
        Initializer, Linear, LinearConfig,
        conv::{Conv2d, Conv2dConfig},
    },
    tensor::{Tensor, backend::Backend},
};

use super::batch_squash::BatchSquash;
use super::config::{Activation, LayerPlan};
use super::error::Result;

/// Encodes squashed observations into flat feature vectors
///
/// ```text
/// [N, C, H, W] -> Conv2d* -> Flatten -> Dense* -> [N, F]
/// ```
#[derive(Module, Debug)]
pub struct InputEncoder<B: Backend> {
    convs: Vec<Conv2d<B>>,
    dense: Vec<Linear<B>>,
    activation: Ignored<Activation>,
    output_size: usize,
}

impl<B: Backend> InputEncoder<B> {
    /// Build the encoder from the conv, flatten and input dense entries of a plan
    ///
    /// Other plan entries are ignored.
    pub fn from_plan(plan: &[LayerPlan], activation: Activation, device: &B::Device) -> Self {
        let mut convs = Vec::new();
        let mut dense = Vec::new();
        let mut output_size = 0;

        for layer in plan {
            match layer {
                LayerPlan::Conv2d {
                    in_channels,
                    params,
                    ..
                } => convs.push(
                    Conv2dConfig::new(
                        [*in_channels, params.filters],
                        [params.kernel_size, params.kernel_size],
                    )
                    .with_stride([params.stride, params.stride])
                    .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                    .init(device),
                ),
                LayerPlan::Flatten { size } => output_size = *size,
                LayerPlan::InputDense { d_input, d_output } => {
                    dense.push(
                        LinearConfig::new(*d_input, *d_output)
                            .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                            .init(device),
                    );
                    output_size = *d_output;
                }
                _ => {}
            }
        }

        Self {
            convs,
            dense,
            activation: Ignored(activation),
            output_size,
        }
    }

    /// Feature size of the encoded output
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn has_convs(&self) -> bool {
        !self.convs.is_empty()
    }

    /// Squash the outer dims of `observation` and encode every item
    ///
    /// With a conv stack the observation must be `[outer.., C, H, W]`.
    pub fn forward<const D: usize>(
        &self,
        observation: Tensor<B, D>,
        squash: &BatchSquash,
    ) -> Result<Tensor<B, 2>> {
        let activation = *self.activation;

        let mut x = if self.convs.is_empty() {
            squash.flatten_features(observation)?
        } else {
            let mut x: Tensor<B, 4> = squash.flatten(observation)?;
            for conv in &self.convs {
                x = activation.apply(conv.forward(x));
            }
            let [n, channels, height, width] = x.dims();
            x.reshape([n, channels * height * width])
        };

        for layer in &self.dense {
            x = activation.apply(layer.forward(x));
        }

        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ConvLayerParams, ValueRnnConfig};
    use burn::backend::ndarray::{NdArray, NdArrayDevice};
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_dense_only_encoder() {
        let device = NdArrayDevice::default();
        let plan = ValueRnnConfig::new(vec![2, 3])
            .with_input_fc_layers(Some(vec![8, 5]))
            .layer_plan()
            .unwrap();
        let encoder = InputEncoder::<TestBackend>::from_plan(&plan, Activation::Relu, &device);
        assert!(!encoder.has_convs());
        assert_eq!(encoder.output_size(), 5);

        let squash = BatchSquash::new(&[4, 3]);
        let obs = Tensor::<TestBackend, 4>::random([4, 3, 2, 3], Distribution::Default, &device);
        let encoded = encoder.forward(obs, &squash).unwrap();
        assert_eq!(encoded.dims(), [12, 5]);

        // relu output is never negative
        for v in encoded.into_data().to_vec::<f32>().unwrap() {
            assert!(v >= 0.0);
        }
    }

    #[test]
    fn test_conv_encoder() {
        let device = NdArrayDevice::default();
        let plan = ValueRnnConfig::new(vec![3, 9, 9])
            .with_conv_layers(Some(vec![
                ConvLayerParams::new(4, 3, 2),
                ConvLayerParams::new(6, 2, 1),
            ]))
            .with_input_fc_layers(None)
            .layer_plan()
            .unwrap();
        let encoder = InputEncoder::<TestBackend>::from_plan(&plan, Activation::Tanh, &device);
        assert!(encoder.has_convs());
        // 9 -> (9 - 3) / 2 + 1 = 4 -> (4 - 2) / 1 + 1 = 3
        assert_eq!(encoder.output_size(), 6 * 3 * 3);

        let squash = BatchSquash::new(&[2]);
        let obs = Tensor::<TestBackend, 4>::random([2, 3, 9, 9], Distribution::Default, &device);
        let encoded = encoder.forward(obs, &squash).unwrap();
        assert_eq!(encoded.dims(), [2, 54]);
    }

    #[test]
    fn test_conv_encoder_with_time_dim() {
        let device = NdArrayDevice::default();
        let plan = ValueRnnConfig::new(vec![1, 5, 5])
            .with_conv_layers(Some(vec![ConvLayerParams::new(2, 3, 1)]))
            .with_input_fc_layers(Some(vec![7]))
            .layer_plan()
            .unwrap();
        let encoder = InputEncoder::<TestBackend>::from_plan(&plan, Activation::Relu, &device);

        let squash = BatchSquash::new(&[2, 4]);
        let obs = Tensor::<TestBackend, 5>::zeros([2, 4, 1, 5, 5], &device);
        let encoded = encoder.forward(obs, &squash).unwrap();
        assert_eq!(encoded.dims(), [8, 7]);
    }
}
