//! Error type shared by the network modules

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Input observation must have a batch or batch x time outer shape, got outer rank {outer_rank}")]
    OuterRank { outer_rank: usize },

    #[error("Observation shape mismatch: expected trailing dims {expected:?}, got {actual:?}")]
    ObservationShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Step type shape mismatch: expected {expected:?}, got {actual:?}")]
    StepTypeShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Recurrent state mismatch: {message}")]
    StateMismatch { message: String },

    #[error("Cannot unroll an empty sequence")]
    EmptySequence,

    #[error("Cannot evaluate an empty batch")]
    EmptyBatch,

    #[error("Cannot reshape rank {from} tensor to rank {to} with {outer} outer dims")]
    SquashRank { from: usize, to: usize, outer: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NetworkError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;
