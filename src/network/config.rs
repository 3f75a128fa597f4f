//! Value network configuration
//!
//! The network is described by an explicit list of optional stages rather than
//! a loosely-typed list of layers. Every stage is either present (`Some`) with
//! at least one layer, or absent (`None`):
//!
//! ```text
//! [optional] Conv2d stack      conv_layers
//!            Flatten
//! [optional] Dense stack       input_fc_layers
//! [optional] LSTM (stacked)    lstm_sizes
//! [optional] Dense stack       output_fc_layers
//!            Dense -> 1        value head
//! ```

use std::fmt;
use std::path::Path;

use burn::tensor::{
    Tensor,
    activation::{gelu, relu, sigmoid, tanh},
    backend::Backend,
};
use serde::{Deserialize, Serialize};

use super::error::{NetworkError, Result};

/// Parameters of a single 2-D convolution (square kernel, valid padding)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvLayerParams {
    /// Number of output channels
    pub filters: usize,
    /// Side length of the square kernel
    pub kernel_size: usize,
    /// Stride along both spatial axes
    pub stride: usize,
}

impl ConvLayerParams {
    pub fn new(filters: usize, kernel_size: usize, stride: usize) -> Self {
        Self {
            filters,
            kernel_size,
            stride,
        }
    }

    /// Spatial extent after applying this convolution to `extent` cells
    ///
    /// Returns `None` when the kernel does not fit.
    pub fn output_extent(&self, extent: usize) -> Option<usize> {
        if self.kernel_size > extent || self.stride == 0 {
            return None;
        }
        Some((extent - self.kernel_size) / self.stride + 1)
    }
}

/// Activation applied after every hidden conv and dense layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Sigmoid,
    Gelu,
    /// Identity
    Linear,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => relu(x),
            Activation::Tanh => tanh(x),
            Activation::Sigmoid => sigmoid(x),
            Activation::Gelu => gelu(x),
            Activation::Linear => x,
        }
    }
}

/// Configuration for [`ValueRnnNetwork`](super::ValueRnnNetwork)
///
/// # Example
///
/// ```rust
/// use value_rnn::network::{ConvLayerParams, ValueRnnConfig};
///
/// // 3x16x16 image observations, two conv layers, two stacked LSTM cells
/// let config = ValueRnnConfig::new(vec![3, 16, 16])
///     .with_conv_layers(Some(vec![
///         ConvLayerParams::new(16, 3, 1),
///         ConvLayerParams::new(32, 3, 2),
///     ]))
///     .with_lstm_sizes(Some(vec![64, 32]));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRnnConfig {
    /// Shape of a single observation, without batch or time dims
    ///
    /// Must be `[channels, height, width]` when a conv stack is configured.
    pub observation_shape: Vec<usize>,

    /// Convolution stack applied before flattening
    ///
    /// Default: absent
    #[serde(default)]
    pub conv_layers: Option<Vec<ConvLayerParams>>,

    /// Dense layers applied before the recurrent cell
    ///
    /// Default: `[75, 40]`
    #[serde(default = "default_input_fc_layers")]
    pub input_fc_layers: Option<Vec<usize>>,

    /// LSTM cell sizes; more than one entry stacks the cells
    ///
    /// Default: `[40]`
    #[serde(default = "default_lstm_sizes")]
    pub lstm_sizes: Option<Vec<usize>>,

    /// Dense layers applied after the recurrent cell
    ///
    /// Default: `[75, 40]`
    #[serde(default = "default_output_fc_layers")]
    pub output_fc_layers: Option<Vec<usize>>,

    /// Hidden layer activation
    ///
    /// Default: relu
    #[serde(default)]
    pub activation: Activation,
}

fn default_input_fc_layers() -> Option<Vec<usize>> {
    Some(vec![75, 40])
}

fn default_lstm_sizes() -> Option<Vec<usize>> {
    Some(vec![40])
}

fn default_output_fc_layers() -> Option<Vec<usize>> {
    Some(vec![75, 40])
}

/// One resolved layer of the pipeline, with concrete sizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerPlan {
    Conv2d {
        in_channels: usize,
        params: ConvLayerParams,
        /// `[filters, height, width]` after the convolution
        output_shape: [usize; 3],
    },
    Flatten {
        size: usize,
    },
    InputDense {
        d_input: usize,
        d_output: usize,
    },
    Lstm {
        d_input: usize,
        d_hidden: usize,
    },
    OutputDense {
        d_input: usize,
        d_output: usize,
    },
    ValueHead {
        d_input: usize,
    },
}

impl fmt::Display for LayerPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerPlan::Conv2d {
                in_channels,
                params,
                output_shape,
            } => write!(
                f,
                "Conv2d      {} -> {} filters, kernel {}, stride {} => {:?}",
                in_channels, params.filters, params.kernel_size, params.stride, output_shape
            ),
            LayerPlan::Flatten { size } => write!(f, "Flatten     => [{}]", size),
            LayerPlan::InputDense { d_input, d_output } => {
                write!(f, "Dense (in)  {} -> {}", d_input, d_output)
            }
            LayerPlan::Lstm { d_input, d_hidden } => {
                write!(f, "LSTM        {} -> {}", d_input, d_hidden)
            }
            LayerPlan::OutputDense { d_input, d_output } => {
                write!(f, "Dense (out) {} -> {}", d_input, d_output)
            }
            LayerPlan::ValueHead { d_input } => write!(f, "Value       {} -> 1", d_input),
        }
    }
}

impl ValueRnnConfig {
    /// Create a configuration with default stages for the given observation shape
    pub fn new(observation_shape: Vec<usize>) -> Self {
        Self {
            observation_shape,
            conv_layers: None,
            input_fc_layers: default_input_fc_layers(),
            lstm_sizes: default_lstm_sizes(),
            output_fc_layers: default_output_fc_layers(),
            activation: Activation::default(),
        }
    }

    pub fn with_conv_layers(mut self, conv_layers: Option<Vec<ConvLayerParams>>) -> Self {
        self.conv_layers = conv_layers;
        self
    }

    pub fn with_input_fc_layers(mut self, input_fc_layers: Option<Vec<usize>>) -> Self {
        self.input_fc_layers = input_fc_layers;
        self
    }

    pub fn with_lstm_sizes(mut self, lstm_sizes: Option<Vec<usize>>) -> Self {
        self.lstm_sizes = lstm_sizes;
        self
    }

    pub fn with_output_fc_layers(mut self, output_fc_layers: Option<Vec<usize>>) -> Self {
        self.output_fc_layers = output_fc_layers;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Validate configuration parameters
    ///
    /// Checks that the observation shape is usable, that every present stage
    /// has at least one non-zero layer and that the conv stack fits the
    /// observation.
    pub fn validate(&self) -> Result<()> {
        self.layer_plan().map(|_| ())
    }

    /// Resolve the configured stages into concrete layers
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidConfig`] for any configuration that
    /// cannot be built.
    pub fn layer_plan(&self) -> Result<Vec<LayerPlan>> {
        if self.observation_shape.is_empty() {
            return Err(NetworkError::config("observation_shape must not be empty"));
        }
        if self.observation_shape.contains(&0) {
            return Err(NetworkError::config(format!(
                "observation_shape dims must be positive, got {:?}",
                self.observation_shape
            )));
        }

        let mut plan = Vec::new();
        let mut features: usize = self.observation_shape.iter().product();

        if let Some(conv_layers) = &self.conv_layers {
            let conv_layers = non_empty("conv_layers", conv_layers)?;
            let [channels, height, width] = match self.observation_shape.as_slice() {
                &[c, h, w] => [c, h, w],
                other => {
                    return Err(NetworkError::config(format!(
                        "conv_layers require a [channels, height, width] observation, got {:?}",
                        other
                    )))
                }
            };

            let (mut channels, mut height, mut width) = (channels, height, width);
            for (i, params) in conv_layers.iter().enumerate() {
                if params.filters == 0 || params.kernel_size == 0 || params.stride == 0 {
                    return Err(NetworkError::config(format!(
                        "conv layer {} has zero filters, kernel_size or stride: {:?}",
                        i, params
                    )));
                }
                let (Some(h), Some(w)) = (params.output_extent(height), params.output_extent(width))
                else {
                    return Err(NetworkError::config(format!(
                        "conv layer {} kernel {} does not fit a {}x{} input",
                        i, params.kernel_size, height, width
                    )));
                };
                plan.push(LayerPlan::Conv2d {
                    in_channels: channels,
                    params: *params,
                    output_shape: [params.filters, h, w],
                });
                channels = params.filters;
                height = h;
                width = w;
            }
            features = channels * height * width;
        }

        plan.push(LayerPlan::Flatten { size: features });

        if let Some(units) = &self.input_fc_layers {
            for &d_output in positive("input_fc_layers", units)? {
                plan.push(LayerPlan::InputDense {
                    d_input: features,
                    d_output,
                });
                features = d_output;
            }
        }

        if let Some(sizes) = &self.lstm_sizes {
            for &d_hidden in positive("lstm_sizes", sizes)? {
                plan.push(LayerPlan::Lstm {
                    d_input: features,
                    d_hidden,
                });
                features = d_hidden;
            }
        }

        if let Some(units) = &self.output_fc_layers {
            for &d_output in positive("output_fc_layers", units)? {
                plan.push(LayerPlan::OutputDense {
                    d_input: features,
                    d_output,
                });
                features = d_output;
            }
        }

        plan.push(LayerPlan::ValueHead { d_input: features });

        Ok(plan)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration as pretty-printed JSON
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn non_empty<'a, T>(stage: &str, layers: &'a [T]) -> Result<&'a [T]> {
    if layers.is_empty() {
        return Err(NetworkError::config(format!(
            "{} is present but empty; use None to disable the stage",
            stage
        )));
    }
    Ok(layers)
}

fn positive<'a>(stage: &str, sizes: &'a [usize]) -> Result<&'a [usize]> {
    let sizes = non_empty(stage, sizes)?;
    if sizes.contains(&0) {
        return Err(NetworkError::config(format!(
            "{} sizes must be positive, got {:?}",
            stage, sizes
        )));
    }
    Ok(sizes)
}
