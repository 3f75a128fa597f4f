use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use value_rnn::logging::init_logger;
use value_rnn::modes::{NetworkSummary, RolloutConfig, RolloutMode};
use value_rnn::network::{
    InferenceBackend, ValueRnnConfig, default_device, load_network, save_network,
};

#[derive(Parser)]
#[command(name = "value_rnn")]
#[command(version, about = "Recurrent value network for RL agents")]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the layer plan and parameter count of a configuration
    Summary {
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Build a freshly initialized network and save it
    Init {
        #[command(flatten)]
        network: NetworkArgs,

        /// Output path (weights go to <out>.mpk, metadata to <out>.meta.json)
        #[arg(long)]
        out: PathBuf,
    },
    /// Stream random episodes through a network, carrying recurrent state
    Rollout {
        #[command(flatten)]
        network: NetworkArgs,

        /// Load a saved network instead of building one from the configuration
        #[arg(long, conflicts_with = "config")]
        model: Option<PathBuf>,

        /// Number of parallel environments
        #[arg(long, default_value = "4")]
        batch: usize,

        /// Steps per environment
        #[arg(long, default_value = "64")]
        steps: usize,

        /// Steps per network call
        #[arg(long, default_value = "16")]
        unroll: usize,

        /// Maximum episode length (at least 2)
        #[arg(long, default_value = "20")]
        max_episode_length: usize,

        /// Seed for episode lengths
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Args)]
struct NetworkArgs {
    /// JSON network configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Observation shape used with the default configuration, e.g. 3,16,16
    #[arg(long, value_delimiter = ',', default_value = "8")]
    observation_shape: Vec<usize>,
}

impl NetworkArgs {
    fn resolve(&self) -> Result<ValueRnnConfig> {
        match &self.config {
            Some(path) => ValueRnnConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path)),
            None => {
                let config = ValueRnnConfig::new(self.observation_shape.clone());
                config.validate()?;
                Ok(config)
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let device = default_device();

    match cli.command {
        Command::Summary { network } => {
            let summary = NetworkSummary::from_config(&network.resolve()?, &device)?;
            println!("{}", summary.format());
        }
        Command::Init { network, out } => {
            let config = network.resolve()?;
            let network = config.init::<InferenceBackend>(&device)?;
            save_network(&network, &out)?;
            info!(path = ?out, "network initialized");
        }
        Command::Rollout {
            network,
            model,
            batch,
            steps,
            unroll,
            max_episode_length,
            seed,
        } => {
            let network = match model {
                Some(path) => load_network::<InferenceBackend>(&path, &device)?.0,
                None => network.resolve()?.init::<InferenceBackend>(&device)?,
            };
            let config = RolloutConfig {
                batch_size: batch,
                total_steps: steps,
                unroll_length: unroll,
                max_episode_length,
                seed,
            };
            let report = RolloutMode::new(network, config, device)?.run()?;
            println!(
                "chunks: {}, episodes: {}, mean value: {:.6}",
                report.chunks, report.episodes, report.mean_value
            );
        }
    }

    Ok(())
}
