//! Summary mode: print the resolved layer plan of a configuration

use anyhow::{Context, Result};
use burn::{backend::ndarray::NdArrayDevice, module::Module};

use crate::network::{InferenceBackend, LayerPlan, ValueRnnConfig};

/// Layer-by-layer description of a network configuration
#[derive(Debug, Clone)]
pub struct NetworkSummary {
    pub observation_shape: Vec<usize>,
    pub layers: Vec<LayerPlan>,
    pub state_spec: Vec<usize>,
    pub num_params: usize,
}

impl NetworkSummary {
    /// Resolve `config` and count the parameters of a freshly built network
    pub fn from_config(config: &ValueRnnConfig, device: &NdArrayDevice) -> Result<Self> {
        let layers = config.layer_plan().context("Invalid network configuration")?;
        let network = config.init::<InferenceBackend>(device)?;

        Ok(Self {
            observation_shape: config.observation_shape.clone(),
            layers,
            state_spec: network.state_spec(),
            num_params: network.num_params(),
        })
    }

    /// Format the summary for display
    pub fn format(&self) -> String {
        let mut lines = Vec::with_capacity(self.layers.len() + 4);
        lines.push(format!("Observation: {:?}", self.observation_shape));
        lines.extend(self.layers.iter().map(|layer| format!("  {}", layer)));
        if self.state_spec.is_empty() {
            lines.push("Recurrent state: none".to_string());
        } else {
            lines.push(format!(
                "Recurrent state: {:?} (hidden, cell per layer)",
                self.state_spec
            ));
        }
        lines.push(format!("Parameters: {}", self.num_params));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ConvLayerParams, default_device};

    #[test]
    fn test_summary_lists_every_layer() {
        let config = ValueRnnConfig::new(vec![1, 5, 5])
            .with_conv_layers(Some(vec![ConvLayerParams::new(2, 3, 1)]))
            .with_lstm_sizes(Some(vec![6, 4]));
        let summary = NetworkSummary::from_config(&config, &default_device()).unwrap();

        // conv, flatten, 2 input dense, 2 lstm, 2 output dense, value head
        assert_eq!(summary.layers.len(), 9);
        assert_eq!(summary.state_spec, vec![6, 4]);
        assert!(summary.num_params > 0);

        let text = summary.format();
        assert!(text.contains("Conv2d"));
        assert!(text.contains("LSTM        40 -> 6"));
        assert!(text.contains("Value       40 -> 1"));
        assert!(text.contains(&format!("Parameters: {}", summary.num_params)));
    }

    #[test]
    fn test_summary_without_recurrent_stage() {
        let config = ValueRnnConfig::new(vec![3]).with_lstm_sizes(None);
        let summary = NetworkSummary::from_config(&config, &default_device()).unwrap();
        assert!(summary.format().contains("Recurrent state: none"));
    }

    #[test]
    fn test_summary_rejects_invalid_config() {
        let config = ValueRnnConfig::new(vec![]);
        assert!(NetworkSummary::from_config(&config, &default_device()).is_err());
    }
}
