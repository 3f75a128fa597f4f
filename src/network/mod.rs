//! Recurrent value network for reinforcement-learning agents
//!
//! Provides:
//! - Stage-by-stage network configuration with validation
//! - Batch/time dimension squashing
//! - Stacked LSTM unroll with resets at episode boundaries
//! - The value network itself and its persistence
//! - Backend aliases for training and inference

pub mod backend;
pub mod batch_squash;
pub mod config;
pub mod dynamic_unroll;
pub mod encoder;
pub mod error;
pub mod persistence;
pub mod step_type;
pub mod value_network;

pub use backend::{InferenceBackend, TrainingBackend, default_device};
pub use batch_squash::BatchSquash;
pub use config::{Activation, ConvLayerParams, LayerPlan, ValueRnnConfig};
pub use dynamic_unroll::{CellState, DynamicUnroll, DynamicUnrollConfig, RecurrentState};
pub use encoder::InputEncoder;
pub use error::{NetworkError, Result};
pub use persistence::{NetworkMetadata, load_network, save_network};
pub use step_type::{StepType, reset_mask, step_type_tensor};
pub use value_network::ValueRnnNetwork;
