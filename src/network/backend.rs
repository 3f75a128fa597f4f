//! Backend type aliases and device management
//!
//! - **TrainingBackend**: autodiff-enabled NdArray backend, for value networks
//!   whose gradients are taken by an external optimizer
//! - **InferenceBackend**: plain NdArray backend for value estimation only
//!
//! # Example
//!
//! ```rust
//! use value_rnn::network::{default_device, InferenceBackend, ValueRnnConfig};
//!
//! let device = default_device();
//! let network = ValueRnnConfig::new(vec![4]).init::<InferenceBackend>(&device).unwrap();
//! assert_eq!(network.state_spec(), vec![40]);
//! ```

use burn::backend::{
    Autodiff,
    ndarray::{NdArray, NdArrayDevice},
};

/// Backend with automatic differentiation
pub type TrainingBackend = Autodiff<NdArray<f32>>;

/// Backend without gradient tracking
pub type InferenceBackend = NdArray<f32>;

/// Default computation device (CPU)
pub fn default_device() -> NdArrayDevice {
    NdArrayDevice::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ValueRnnConfig;
    use burn::tensor::Tensor;

    #[test]
    fn test_default_device_runs_both_backends() {
        let device = default_device();
        let config = ValueRnnConfig::new(vec![3]);

        let inference = config.init::<InferenceBackend>(&device).unwrap();
        let observation = Tensor::<InferenceBackend, 2>::zeros([2, 3], &device);
        let (value, _) = inference.forward_batch(observation, None, None).unwrap();
        assert_eq!(value.dims(), [2]);

        let training = config.init::<TrainingBackend>(&device).unwrap();
        let observation = Tensor::<TrainingBackend, 2>::zeros([2, 3], &device);
        let (value, _) = training.forward_batch(observation, None, None).unwrap();
        assert_eq!(value.dims(), [2]);
    }
}
