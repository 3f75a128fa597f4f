//! Saving and loading value networks
//!
//! A network is stored as two files:
//! - `<path>.mpk` - weights, written by Burn's `NamedMpkFileRecorder`
//! - `<path>.meta.json` - the [`ValueRnnConfig`] needed to rebuild the layers,
//!   plus bookkeeping

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{ValueRnnConfig, ValueRnnNetwork};

/// Metadata saved next to the weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMetadata {
    /// Configuration the network was built from
    pub config: ValueRnnConfig,

    /// Total number of parameters, checked on load
    pub num_params: usize,

    /// Crate version that wrote the file
    pub version: String,
}

impl NetworkMetadata {
    pub fn new(config: ValueRnnConfig, num_params: usize) -> Self {
        Self {
            config,
            num_params,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn metadata_path(path: &Path) -> PathBuf {
    path.with_extension("meta.json")
}

/// Save a network's weights and metadata
///
/// Creates parent directories if they don't exist. The recorder appends its
/// own `.mpk` extension to `path`.
pub fn save_network<B: Backend>(network: &ValueRnnNetwork<B>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    recorder
        .record(network.clone().into_record(), path.to_path_buf())
        .context("Failed to save network weights")?;

    let metadata = NetworkMetadata::new(network.config().clone(), network.num_params());
    let meta_path = metadata_path(path);
    let meta_json =
        serde_json::to_string_pretty(&metadata).context("Failed to serialize metadata")?;
    std::fs::write(&meta_path, meta_json)
        .with_context(|| format!("Failed to write metadata to {:?}", meta_path))?;

    info!(path = ?path, params = metadata.num_params, "saved value network");
    Ok(())
}

/// Load a network saved with [`save_network`]
///
/// The layers are rebuilt from the stored configuration before the weights
/// are loaded into them.
pub fn load_network<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(ValueRnnNetwork<B>, NetworkMetadata)> {
    let meta_path = metadata_path(path);
    let meta_json = std::fs::read_to_string(&meta_path)
        .with_context(|| format!("Failed to read metadata from {:?}", meta_path))?;
    let metadata: NetworkMetadata =
        serde_json::from_str(&meta_json).context("Failed to deserialize metadata")?;

    let network = metadata
        .config
        .init::<B>(device)
        .context("Stored configuration is invalid")?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let record = recorder
        .load(path.to_path_buf(), device)
        .with_context(|| format!("Failed to load network weights from {:?}", path))?;
    let network = network.load_record(record);

    anyhow::ensure!(
        network.num_params() == metadata.num_params,
        "Parameter count mismatch: metadata says {}, network has {}",
        metadata.num_params,
        network.num_params()
    );

    Ok((network, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ConvLayerParams, InferenceBackend, default_device};
    use burn::tensor::{Distribution, Tensor};
    use tempfile::TempDir;

    #[test]
    fn test_metadata_serialization() {
        let metadata = NetworkMetadata::new(ValueRnnConfig::new(vec![4]), 1234);

        let json = serde_json::to_string(&metadata).unwrap();
        let deserialized: NetworkMetadata = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.config, ValueRnnConfig::new(vec![4]));
        assert_eq!(deserialized.num_params, 1234);
        assert_eq!(deserialized.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_save_and_load_preserves_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("value");
        let device = default_device();

        let config = ValueRnnConfig::new(vec![1, 6, 6])
            .with_conv_layers(Some(vec![ConvLayerParams::new(3, 3, 1)]))
            .with_lstm_sizes(Some(vec![8, 4]));
        let network = config.init::<InferenceBackend>(&device).unwrap();
        save_network(&network, &path).unwrap();
        assert!(path.with_extension("meta.json").exists());

        let (loaded, metadata) = load_network::<InferenceBackend>(&path, &device).unwrap();
        assert_eq!(metadata.config, config);
        assert_eq!(loaded.num_params(), network.num_params());

        let observation =
            Tensor::<InferenceBackend, 5>::random([2, 3, 1, 6, 6], Distribution::Default, &device);
        let (expected, _) = network
            .forward_sequence(observation.clone(), None, None)
            .unwrap();
        let (actual, _) = loaded.forward_sequence(observation, None, None).unwrap();

        let expected = expected.into_data().to_vec::<f32>().unwrap();
        let actual = actual.into_data().to_vec::<f32>().unwrap();
        for (e, a) in expected.iter().zip(actual.iter()) {
            assert!((e - a).abs() < 1e-6);
        }
    }

    #[test]
    fn test_load_missing_metadata_fails() {
        let dir = TempDir::new().unwrap();
        let result =
            load_network::<InferenceBackend>(&dir.path().join("missing"), &default_device());
        assert!(result.is_err());
    }
}
