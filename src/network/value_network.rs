//! Recurrent value network
//!
//! Estimates one scalar state value per observation:
//!
//! ```text
//! Input: [batch, ...obs] or [batch, time, ...obs]
//!   ↓ squash outer dims: [batch*time, ...obs]
//!   ↓ Conv2d stack + activation          (optional)
//!   ↓ Flatten
//!   ↓ Dense stack + activation           (optional)
//!   ↓ unsquash: [batch, time, features]
//!   ↓ LSTM unroll, reset where step_type == First   (optional)
//!   ↓ squash: [batch*time, hidden]
//!   ↓ Dense stack + activation           (optional)
//!   ↓ Dense -> 1
//!   ↓ unsquash
//! Output: [batch] or [batch, time]
//! ```
//!
//! # Example
//!
//! ```rust
//! use value_rnn::network::ValueRnnConfig;
//! use burn::backend::ndarray::{NdArray, NdArrayDevice};
//! use burn::tensor::Tensor;
//!
//! type Backend = NdArray<f32>;
//!
//! let device = NdArrayDevice::default();
//! let network = ValueRnnConfig::new(vec![6]).init::<Backend>(&device).unwrap();
//!
//! // 4 sequences of 10 steps
//! let observation = Tensor::<Backend, 3>::zeros([4, 10, 6], &device);
//! let (value, state) = network.forward_sequence(observation, None, None).unwrap();
//!
//! assert_eq!(value.dims(), [4, 10]);
//! assert_eq!(state.batch_size(), Some(4));
//! ```

use burn::{
    module::{Ignored, Module},
    nn::{Initializer, Linear, LinearConfig},
    tensor::{Int, Tensor, backend::Backend},
};
use tracing::debug;

use super::batch_squash::BatchSquash;
use super::config::{Activation, LayerPlan, ValueRnnConfig};
use super::dynamic_unroll::{DynamicUnroll, DynamicUnrollConfig, RecurrentState};
use super::encoder::InputEncoder;
use super::error::{NetworkError, Result};
use super::step_type::reset_mask;

impl ValueRnnConfig {
    /// Initialize the value network from this configuration
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidConfig`] if the configuration does not
    /// validate.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ValueRnnNetwork<B>> {
        let plan = self.layer_plan()?;

        let encoder = InputEncoder::from_plan(&plan, self.activation, device);

        let mut lstm_input = None;
        let mut lstm_sizes = Vec::new();
        let mut output_layers = Vec::new();
        let mut value_input = encoder.output_size();

        for layer in &plan {
            match layer {
                LayerPlan::Lstm { d_input, d_hidden } => {
                    if lstm_input.is_none() {
                        lstm_input = Some(*d_input);
                    }
                    lstm_sizes.push(*d_hidden);
                }
                LayerPlan::OutputDense { d_input, d_output } => output_layers.push(
                    LinearConfig::new(*d_input, *d_output)
                        .with_initializer(Initializer::KaimingNormal {
                            gain: std::f64::consts::SQRT_2,
                            fan_out_only: false,
                        })
                        .init(device),
                ),
                LayerPlan::ValueHead { d_input } => value_input = *d_input,
                _ => {}
            }
        }

        let recurrent =
            lstm_input.map(|d_input| DynamicUnrollConfig::new(d_input, lstm_sizes).init(device));

        let value_head = LinearConfig::new(value_input, 1)
            .with_initializer(Initializer::Uniform {
                min: -0.03,
                max: 0.03,
            })
            .init(device);

        let network = ValueRnnNetwork {
            encoder,
            recurrent,
            output_layers,
            value_head,
            activation: Ignored(self.activation),
            config: Ignored(self.clone()),
        };

        debug!(
            layers = plan.len(),
            params = network.num_params(),
            "initialized value network"
        );

        Ok(network)
    }
}

/// Value network with an optional recurrent core
///
/// Generic over the Burn backend so the same network runs for inference
/// (`NdArray<f32>`) and training (`Autodiff<NdArray<f32>>`).
#[derive(Module, Debug)]
pub struct ValueRnnNetwork<B: Backend> {
    encoder: InputEncoder<B>,
    recurrent: Option<DynamicUnroll<B>>,
    output_layers: Vec<Linear<B>>,
    value_head: Linear<B>,
    activation: Ignored<Activation>,
    config: Ignored<ValueRnnConfig>,
}

impl<B: Backend> ValueRnnNetwork<B> {
    pub fn config(&self) -> &ValueRnnConfig {
        &self.config
    }

    /// Hidden size of each stacked recurrent cell; empty without a recurrent stage
    pub fn state_spec(&self) -> Vec<usize> {
        self.recurrent
            .as_ref()
            .map(|unroll| unroll.state_spec().to_vec())
            .unwrap_or_default()
    }

    /// Initial recurrent state for `batch_size` sequences
    pub fn zero_state(&self, batch_size: usize, device: &B::Device) -> RecurrentState<B> {
        match &self.recurrent {
            Some(unroll) => unroll.zero_state(batch_size, device),
            None => RecurrentState::empty(),
        }
    }

    /// Number of outer dims of an observation with the given shape
    ///
    /// # Errors
    ///
    /// Fails when the trailing dims differ from the configured observation
    /// shape, or when the outer rank is not 1 (batch) or 2 (batch x time).
    pub fn outer_rank(&self, dims: &[usize]) -> Result<usize> {
        let expected = &self.config.observation_shape;
        if dims.len() < expected.len()
            || dims[dims.len() - expected.len()..] != expected[..]
        {
            return Err(NetworkError::ObservationShape {
                expected: expected.clone(),
                actual: dims.to_vec(),
            });
        }

        let outer_rank = dims.len() - expected.len();
        if !(1..=2).contains(&outer_rank) {
            return Err(NetworkError::OuterRank { outer_rank });
        }
        Ok(outer_rank)
    }

    /// Estimate values for a batch of single observations
    ///
    /// A time dim of 1 is implied. The returned state can be passed to the next
    /// call to continue the sequences.
    ///
    /// # Arguments
    ///
    /// * `observation` - `[batch, ...observation_shape]`
    /// * `step_type` - `[batch]`; rows equal to `StepType::First` start from a
    ///   zero state
    /// * `state` - state returned by the previous call, or `None`
    ///
    /// # Returns
    ///
    /// Values with shape `[batch]` and the updated recurrent state.
    pub fn forward_batch<const D: usize>(
        &self,
        observation: Tensor<B, D>,
        step_type: Option<Tensor<B, 1, Int>>,
        state: Option<RecurrentState<B>>,
    ) -> Result<(Tensor<B, 1>, RecurrentState<B>)> {
        let dims = observation.dims();
        let outer_rank = self.outer_rank(&dims)?;
        if outer_rank != 1 {
            return Err(NetworkError::OuterRank { outer_rank });
        }

        let batch = dims[0];
        if batch == 0 {
            return Err(NetworkError::EmptyBatch);
        }
        let step_type = step_type
            .map(|step_type| {
                if step_type.dims() != [batch] {
                    return Err(NetworkError::StepTypeShape {
                        expected: vec![batch],
                        actual: step_type.dims().to_vec(),
                    });
                }
                Ok(step_type.reshape([batch, 1]))
            })
            .transpose()?;

        let squash = BatchSquash::new(&[batch]);
        let (values, state) =
            self.forward_squashed(observation, &squash, batch, 1, step_type, state)?;
        let values = squash.unflatten(values)?;
        Ok((values, state))
    }

    /// Estimate values for a batch of observation sequences
    ///
    /// # Arguments
    ///
    /// * `observation` - `[batch, time, ...observation_shape]`
    /// * `step_type` - `[batch, time]`; the recurrent state of a row is reset
    ///   before every step equal to `StepType::First`
    /// * `state` - state returned by the previous call, or `None`
    ///
    /// # Returns
    ///
    /// Values with shape `[batch, time]` and the state after the last step.
    pub fn forward_sequence<const D: usize>(
        &self,
        observation: Tensor<B, D>,
        step_type: Option<Tensor<B, 2, Int>>,
        state: Option<RecurrentState<B>>,
    ) -> Result<(Tensor<B, 2>, RecurrentState<B>)> {
        let dims = observation.dims();
        let outer_rank = self.outer_rank(&dims)?;
        if outer_rank != 2 {
            return Err(NetworkError::OuterRank { outer_rank });
        }

        let (batch, time) = (dims[0], dims[1]);
        if batch == 0 {
            return Err(NetworkError::EmptyBatch);
        }
        if time == 0 {
            return Err(NetworkError::EmptySequence);
        }
        if let Some(step_type) = &step_type {
            if step_type.dims() != [batch, time] {
                return Err(NetworkError::StepTypeShape {
                    expected: vec![batch, time],
                    actual: step_type.dims().to_vec(),
                });
            }
        }

        let squash = BatchSquash::new(&[batch, time]);
        let (values, state) =
            self.forward_squashed(observation, &squash, batch, time, step_type, state)?;
        let values = squash.unflatten(values)?;
        Ok((values, state))
    }

    /// Shared pipeline; returns one value per squashed item (`[batch * time]`)
    fn forward_squashed<const D: usize>(
        &self,
        observation: Tensor<B, D>,
        squash: &BatchSquash,
        batch: usize,
        time: usize,
        step_type: Option<Tensor<B, 2, Int>>,
        state: Option<RecurrentState<B>>,
    ) -> Result<(Tensor<B, 1>, RecurrentState<B>)> {
        let encoded = self.encoder.forward(observation, squash)?;

        let (features, state) = match &self.recurrent {
            Some(unroll) => {
                let sequence = BatchSquash::new(&[batch, time]);
                let inputs: Tensor<B, 3> = sequence.unflatten(encoded)?;
                let (outputs, state) = unroll.forward(inputs, step_type.map(reset_mask), state)?;
                let features: Tensor<B, 2> = sequence.flatten(outputs)?;
                (features, state)
            }
            None => match state {
                Some(state) if !state.is_empty() => {
                    return Err(NetworkError::StateMismatch {
                        message: format!(
                            "network has no recurrent stage but got {} cell states",
                            state.layers().len()
                        ),
                    })
                }
                _ => (encoded, RecurrentState::empty()),
            },
        };

        let activation = *self.activation;
        let mut x = features;
        for layer in &self.output_layers {
            x = activation.apply(layer.forward(x));
        }

        let value = self.value_head.forward(x);
        let [n, _] = value.dims();
        Ok((value.reshape([n]), state))
    }
}
