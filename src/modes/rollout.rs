//! Rollout mode: stream random episodes through a value network
//!
//! Simulates the way an agent queries its value network while collecting
//! experience: `batch_size` parallel environments produce random observations,
//! episodes end after a random number of steps, and the network is called on
//! fixed-length chunks with the recurrent state carried from one chunk to the
//! next. Each new episode is marked with `StepType::First` so its state starts
//! from zeros.
//!
//! # Example
//!
//! ```rust
//! use value_rnn::modes::{RolloutConfig, RolloutMode};
//! use value_rnn::network::{default_device, InferenceBackend, ValueRnnConfig};
//!
//! let device = default_device();
//! let network = ValueRnnConfig::new(vec![4]).init::<InferenceBackend>(&device).unwrap();
//!
//! let config = RolloutConfig {
//!     batch_size: 2,
//!     total_steps: 12,
//!     unroll_length: 4,
//!     max_episode_length: 5,
//!     seed: Some(7),
//! };
//! let mut mode = RolloutMode::new(network, config, device).unwrap();
//! let report = mode.run().unwrap();
//! assert_eq!(report.chunks, 3);
//! ```

use anyhow::{Context, Result, bail};
use burn::tensor::{Distribution, ElementConversion, Tensor, backend::Backend};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, info};

use crate::network::{RecurrentState, StepType, ValueRnnNetwork, step_type_tensor};

/// Configuration for rollout mode
#[derive(Debug, Clone)]
pub struct RolloutConfig {
    /// Number of parallel environments
    pub batch_size: usize,

    /// Steps to run per environment
    pub total_steps: usize,

    /// Steps per network call; state is carried between calls
    pub unroll_length: usize,

    /// Episodes last between 2 and this many steps, `First` through `Last`
    pub max_episode_length: usize,

    /// Seed for episode lengths; `None` draws from entropy
    pub seed: Option<u64>,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            total_steps: 64,
            unroll_length: 16,
            max_episode_length: 20,
            seed: None,
        }
    }
}

impl RolloutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.total_steps == 0 {
            bail!("total_steps must be at least 1");
        }
        if self.unroll_length == 0 {
            bail!("unroll_length must be at least 1");
        }
        if self.max_episode_length < 2 {
            bail!("max_episode_length must be at least 2");
        }
        Ok(())
    }
}

/// Outcome of a rollout
#[derive(Debug, Clone, Default)]
pub struct RolloutReport {
    /// Network calls made
    pub chunks: usize,

    /// Episodes started across all environments
    pub episodes: usize,

    /// Mean value over every step of every environment
    pub mean_value: f32,
}

/// Episode bookkeeping for one environment
#[derive(Debug, Clone, Copy, Default)]
struct EpisodeClock {
    remaining: usize,
}

impl EpisodeClock {
    /// Step type of the next step; starts a new episode when the last one ended
    fn tick(&mut self, rng: &mut StdRng, max_episode_length: usize) -> StepType {
        let step = if self.remaining == 0 {
            self.remaining = rng.gen_range(2..=max_episode_length);
            StepType::First
        } else if self.remaining == 1 {
            StepType::Last
        } else {
            StepType::Mid
        };
        self.remaining -= 1;
        step
    }
}

/// Rollout mode runner
pub struct RolloutMode<B: Backend> {
    network: ValueRnnNetwork<B>,
    config: RolloutConfig,
    device: B::Device,
    rng: StdRng,
    clocks: Vec<EpisodeClock>,
}

impl<B: Backend> RolloutMode<B> {
    pub fn new(
        network: ValueRnnNetwork<B>,
        config: RolloutConfig,
        device: B::Device,
    ) -> Result<Self> {
        config.validate()?;
        let observation_rank = network.config().observation_shape.len();
        if !(1..=3).contains(&observation_rank) {
            bail!(
                "rollout supports observations of rank 1 to 3, got {:?}",
                network.config().observation_shape
            );
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let clocks = vec![EpisodeClock::default(); config.batch_size];

        Ok(Self {
            network,
            config,
            device,
            rng,
            clocks,
        })
    }

    /// Run the rollout to completion
    pub fn run(&mut self) -> Result<RolloutReport> {
        info!(
            batch_size = self.config.batch_size,
            total_steps = self.config.total_steps,
            unroll_length = self.config.unroll_length,
            "starting rollout"
        );

        let mut report = RolloutReport::default();
        let mut state: Option<RecurrentState<B>> = None;
        let mut value_sum = 0.0f64;
        let mut step = 0;

        while step < self.config.total_steps {
            let length = self.config.unroll_length.min(self.config.total_steps - step);
            let step_rows = self.next_step_types(length);
            let started = step_rows
                .iter()
                .flatten()
                .filter(|step_type| step_type.is_first())
                .count();

            let (values, next_state) = self
                .run_chunk(&step_rows, state.take())
                .with_context(|| format!("Network call failed at step {}", step))?;

            let chunk_sum = values.sum().into_scalar().elem::<f64>();
            let chunk_mean = chunk_sum / (self.config.batch_size * length) as f64;
            value_sum += chunk_sum;

            info!(
                chunk = report.chunks,
                steps = length,
                episodes_started = started,
                mean_value = chunk_mean,
                "evaluated chunk"
            );

            report.chunks += 1;
            report.episodes += started;
            state = Some(next_state.detach());
            step += length;
        }

        report.mean_value =
            (value_sum / (self.config.batch_size * self.config.total_steps) as f64) as f32;
        info!(
            chunks = report.chunks,
            episodes = report.episodes,
            mean_value = report.mean_value,
            "rollout complete"
        );
        Ok(report)
    }

    /// Step types for the next `length` steps of every environment
    fn next_step_types(&mut self, length: usize) -> Vec<Vec<StepType>> {
        let max_episode_length = self.config.max_episode_length;
        let rng = &mut self.rng;
        self.clocks
            .iter_mut()
            .map(|clock| (0..length).map(|_| clock.tick(rng, max_episode_length)).collect())
            .collect()
    }

    fn run_chunk(
        &self,
        step_rows: &[Vec<StepType>],
        state: Option<RecurrentState<B>>,
    ) -> Result<(Tensor<B, 2>, RecurrentState<B>)> {
        match self.network.config().observation_shape.len() {
            1 => self.run_chunk_with_rank::<3>(step_rows, state),
            2 => self.run_chunk_with_rank::<4>(step_rows, state),
            3 => self.run_chunk_with_rank::<5>(step_rows, state),
            rank => bail!("unsupported observation rank {}", rank),
        }
    }

    fn run_chunk_with_rank<const D: usize>(
        &self,
        step_rows: &[Vec<StepType>],
        state: Option<RecurrentState<B>>,
    ) -> Result<(Tensor<B, 2>, RecurrentState<B>)> {
        let length = step_rows.first().map_or(0, Vec::len);
        let mut dims = vec![self.config.batch_size, length];
        dims.extend_from_slice(&self.network.config().observation_shape);
        let shape: [usize; D] = dims
            .as_slice()
            .try_into()
            .with_context(|| format!("observation dims {:?} do not have rank {}", dims, D))?;
        debug!(?shape, "sampling observations");

        let observation =
            Tensor::<B, D>::random(shape, Distribution::Uniform(-1.0, 1.0), &self.device);
        let step_type = step_type_tensor::<B>(step_rows, &self.device)?;

        Ok(self
            .network
            .forward_sequence(observation, Some(step_type), state)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{
        ConvLayerParams, InferenceBackend, TrainingBackend, ValueRnnConfig, default_device,
    };

    fn mode(
        config: ValueRnnConfig,
        rollout: RolloutConfig,
    ) -> Result<RolloutMode<InferenceBackend>> {
        let device = default_device();
        let network = config.init::<InferenceBackend>(&device)?;
        RolloutMode::new(network, rollout, device)
    }

    #[test]
    fn test_episode_clock_marks_boundaries() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut clock = EpisodeClock::default();

        let steps: Vec<StepType> = (0..50).map(|_| clock.tick(&mut rng, 4)).collect();
        assert_eq!(steps[0], StepType::First);

        // Episodes run First, Mid*, Last and last between 2 and 4 steps
        let mut length = 0;
        for (i, step) in steps.iter().enumerate() {
            if step.is_first() {
                if i > 0 {
                    assert_eq!(steps[i - 1], StepType::Last);
                }
                length = 0;
            }
            if *step == StepType::Last {
                assert!(length >= 1, "Last at step {} opens an episode", i);
                assert!(i + 1 == steps.len() || steps[i + 1].is_first());
            }
            length += 1;
            assert!(length <= 4);
        }
    }

    #[test]
    fn test_shortest_episodes_have_first_and_last() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut clock = EpisodeClock::default();
        for _ in 0..5 {
            assert_eq!(clock.tick(&mut rng, 2), StepType::First);
            assert_eq!(clock.tick(&mut rng, 2), StepType::Last);
        }
    }

    #[test]
    fn test_rollout_chunks() {
        let rollout = RolloutConfig {
            batch_size: 3,
            total_steps: 10,
            unroll_length: 4,
            max_episode_length: 3,
            seed: Some(11),
        };
        let mut mode = mode(ValueRnnConfig::new(vec![4]), rollout).unwrap();
        let report = mode.run().unwrap();

        // 4 + 4 + 2 steps
        assert_eq!(report.chunks, 3);
        // Every environment starts at least ceil(10 / 3) episodes
        assert!(report.episodes >= 3 * 4);
        assert!(report.mean_value.is_finite());
    }

    #[test]
    fn test_rollout_with_image_observations() {
        let config = ValueRnnConfig::new(vec![2, 6, 6])
            .with_conv_layers(Some(vec![ConvLayerParams::new(4, 3, 1)]));
        let rollout = RolloutConfig {
            batch_size: 2,
            total_steps: 6,
            unroll_length: 3,
            max_episode_length: 4,
            seed: Some(5),
        };
        let report = mode(config, rollout).unwrap().run().unwrap();
        assert_eq!(report.chunks, 2);
    }

    #[test]
    fn test_rollout_without_recurrent_stage() {
        let config = ValueRnnConfig::new(vec![4]).with_lstm_sizes(None);
        let report = mode(config, RolloutConfig { seed: Some(1), ..Default::default() })
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(report.chunks, 4);
    }

    #[test]
    fn test_invalid_rollout_config() {
        let rollout = RolloutConfig {
            unroll_length: 0,
            ..Default::default()
        };
        assert!(mode(ValueRnnConfig::new(vec![4]), rollout).is_err());

        // An episode needs room for both First and Last
        let rollout = RolloutConfig {
            max_episode_length: 1,
            ..Default::default()
        };
        assert!(rollout.validate().is_err());
    }

    #[test]
    fn test_rollout_on_training_backend() {
        let device = default_device();
        let network = ValueRnnConfig::new(vec![3])
            .init::<TrainingBackend>(&device)
            .unwrap();
        let rollout = RolloutConfig {
            batch_size: 2,
            total_steps: 8,
            unroll_length: 2,
            max_episode_length: 3,
            seed: Some(9),
        };
        let report = RolloutMode::new(network, rollout, device).unwrap().run().unwrap();
        assert_eq!(report.chunks, 4);
        assert!(report.mean_value.is_finite());
    }

    #[test]
    fn test_unsupported_observation_rank() {
        let config = ValueRnnConfig::new(vec![1, 2, 2, 2]);
        assert!(mode(config, RolloutConfig::default()).is_err());
    }
}
