pub mod rollout;
pub mod summary;

pub use rollout::{RolloutConfig, RolloutMode, RolloutReport};
pub use summary::NetworkSummary;
