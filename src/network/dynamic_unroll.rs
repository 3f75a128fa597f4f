//! Recurrent unroll over a time sequence with episode resets
//!
//! A stack of LSTM cells is stepped over `[batch, time, features]` inputs.
//! Before step `t`, every batch row whose reset mask is set at `t` has the
//! state of all stacked cells replaced by zeros, so an episode that starts in
//! the middle of a sequence never sees state from the previous episode.
//!
//! When no row resets after the first step, the whole sequence is handed to
//! each cell at once instead of being stepped one time slice at a time.

use burn::{
    module::{Ignored, Module},
    nn::{Initializer, Lstm, LstmConfig, LstmState},
    tensor::{Bool, ElementConversion, Tensor, backend::Backend},
};
use tracing::trace;

use super::error::{NetworkError, Result};

/// Hidden and cell tensors of one LSTM layer, both `[batch, size]`
#[derive(Debug, Clone)]
pub struct CellState<B: Backend> {
    pub hidden: Tensor<B, 2>,
    pub cell: Tensor<B, 2>,
}

impl<B: Backend> CellState<B> {
    pub fn zeros(batch_size: usize, size: usize, device: &B::Device) -> Self {
        Self {
            hidden: Tensor::zeros([batch_size, size], device),
            cell: Tensor::zeros([batch_size, size], device),
        }
    }

    /// Zero the rows selected by `reset` (`[batch, 1]`)
    fn reset_rows(self, reset: Tensor<B, 2, Bool>) -> Self {
        let dims = self.hidden.dims();
        let reset = reset.expand(dims);
        Self {
            hidden: self.hidden.mask_fill(reset.clone(), 0.0),
            cell: self.cell.mask_fill(reset, 0.0),
        }
    }
}

/// Recurrent state carried between network calls, one entry per stacked cell
///
/// Networks without a recurrent stage carry an empty state.
#[derive(Debug, Clone)]
pub struct RecurrentState<B: Backend> {
    layers: Vec<CellState<B>>,
}

impl<B: Backend> RecurrentState<B> {
    pub fn new(layers: Vec<CellState<B>>) -> Self {
        Self { layers }
    }

    pub fn empty() -> Self {
        Self { layers: Vec::new() }
    }

    /// All-zero state for the given per-layer sizes
    pub fn zeros(batch_size: usize, sizes: &[usize], device: &B::Device) -> Self {
        Self {
            layers: sizes
                .iter()
                .map(|&size| CellState::zeros(batch_size, size, device))
                .collect(),
        }
    }

    pub fn layers(&self) -> &[CellState<B>] {
        &self.layers
    }

    pub fn into_layers(self) -> Vec<CellState<B>> {
        self.layers
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Batch size of the carried state, `None` when empty
    pub fn batch_size(&self) -> Option<usize> {
        self.layers.first().map(|layer| layer.hidden.dims()[0])
    }

    /// Cut the state out of the autodiff graph
    ///
    /// Used when carrying state across separately differentiated chunks.
    pub fn detach(self) -> Self {
        Self {
            layers: self
                .layers
                .into_iter()
                .map(|layer| CellState {
                    hidden: layer.hidden.detach(),
                    cell: layer.cell.detach(),
                })
                .collect(),
        }
    }

    fn reset_rows(self, reset: Tensor<B, 2, Bool>) -> Self {
        Self {
            layers: self
                .layers
                .into_iter()
                .map(|layer| layer.reset_rows(reset.clone()))
                .collect(),
        }
    }
}

/// Configuration for [`DynamicUnroll`]
#[derive(Debug, Clone)]
pub struct DynamicUnrollConfig {
    /// Feature size of the unrolled inputs
    pub d_input: usize,
    /// One LSTM cell per entry, stacked in order
    pub sizes: Vec<usize>,
}

impl DynamicUnrollConfig {
    pub fn new(d_input: usize, sizes: Vec<usize>) -> Self {
        Self { d_input, sizes }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> DynamicUnroll<B> {
        let mut cells = Vec::with_capacity(self.sizes.len());
        let mut d_input = self.d_input;
        for &d_hidden in &self.sizes {
            cells.push(
                LstmConfig::new(d_input, d_hidden, true)
                    .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                    .init(device),
            );
            d_input = d_hidden;
        }

        DynamicUnroll {
            cells,
            sizes: Ignored(self.sizes.clone()),
        }
    }
}

/// Stacked LSTM cells unrolled over time with masked state resets
#[derive(Module, Debug)]
pub struct DynamicUnroll<B: Backend> {
    cells: Vec<Lstm<B>>,
    sizes: Ignored<Vec<usize>>,
}

impl<B: Backend> DynamicUnroll<B> {
    /// Hidden size of each stacked cell
    pub fn state_spec(&self) -> &[usize] {
        &self.sizes
    }

    /// Feature size of the unroll output
    pub fn output_size(&self) -> usize {
        self.sizes.last().copied().unwrap_or(0)
    }

    pub fn zero_state(&self, batch_size: usize, device: &B::Device) -> RecurrentState<B> {
        RecurrentState::zeros(batch_size, &self.sizes, device)
    }

    /// Unroll the cells over `inputs`
    ///
    /// # Arguments
    ///
    /// * `inputs` - `[batch, time, features]`
    /// * `reset_mask` - `[batch, time]`, true where the state must be zeroed
    ///   before the step; `None` never resets
    /// * `initial_state` - state from a previous call; `None` starts from zeros
    ///
    /// # Returns
    ///
    /// Outputs of the last cell `[batch, time, hidden]` and the state after the
    /// final step.
    pub fn forward(
        &self,
        inputs: Tensor<B, 3>,
        reset_mask: Option<Tensor<B, 2, Bool>>,
        initial_state: Option<RecurrentState<B>>,
    ) -> Result<(Tensor<B, 3>, RecurrentState<B>)> {
        let [batch, time, _] = inputs.dims();
        if time == 0 {
            return Err(NetworkError::EmptySequence);
        }

        let state = match initial_state {
            Some(state) => {
                self.check_state(&state, batch)?;
                state
            }
            None => self.zero_state(batch, &inputs.device()),
        };

        let Some(reset_mask) = reset_mask else {
            return Ok(self.run_cells(inputs, state));
        };
        if reset_mask.dims() != [batch, time] {
            return Err(NetworkError::StepTypeShape {
                expected: vec![batch, time],
                actual: reset_mask.dims().to_vec(),
            });
        }

        let state = state.reset_rows(reset_mask.clone().slice([0..batch, 0..1]));
        if !resets_after_first_step(&reset_mask) {
            trace!(batch, time, "unrolling full sequence");
            return Ok(self.run_cells(inputs, state));
        }

        trace!(batch, time, "stepping sequence with mid-sequence resets");
        let [_, _, features] = inputs.dims();
        let mut state = state;
        let mut outputs = Vec::with_capacity(time);
        for t in 0..time {
            if t > 0 {
                state = state.reset_rows(reset_mask.clone().slice([0..batch, t..t + 1]));
            }
            let step = inputs.clone().slice([0..batch, t..t + 1, 0..features]);
            let (output, next) = self.run_cells(step, state);
            outputs.push(output);
            state = next;
        }

        Ok((Tensor::cat(outputs, 1), state))
    }

    /// Feed `inputs` through every stacked cell without resets
    fn run_cells(
        &self,
        inputs: Tensor<B, 3>,
        state: RecurrentState<B>,
    ) -> (Tensor<B, 3>, RecurrentState<B>) {
        let mut x = inputs;
        let mut next = Vec::with_capacity(self.cells.len());
        for (cell, layer_state) in self.cells.iter().zip(state.into_layers()) {
            let (output, lstm_state) = cell.forward(
                x,
                Some(LstmState::new(layer_state.cell, layer_state.hidden)),
            );
            next.push(CellState {
                hidden: lstm_state.hidden,
                cell: lstm_state.cell,
            });
            x = output;
        }
        (x, RecurrentState::new(next))
    }

    fn check_state(&self, state: &RecurrentState<B>, batch: usize) -> Result<()> {
        if state.layers().len() != self.sizes.len() {
            return Err(NetworkError::StateMismatch {
                message: format!(
                    "expected {} stacked cell states, got {}",
                    self.sizes.len(),
                    state.layers().len()
                ),
            });
        }
        for (i, (layer, &size)) in state.layers().iter().zip(self.sizes.iter()).enumerate() {
            let expected = [batch, size];
            if layer.hidden.dims() != expected || layer.cell.dims() != expected {
                return Err(NetworkError::StateMismatch {
                    message: format!(
                        "layer {} expects {:?}, got hidden {:?} and cell {:?}",
                        i,
                        expected,
                        layer.hidden.dims(),
                        layer.cell.dims()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Whether any row resets at a step other than the first
fn resets_after_first_step<B: Backend>(reset_mask: &Tensor<B, 2, Bool>) -> bool {
    let [batch, time] = reset_mask.dims();
    if time < 2 {
        return false;
    }
    let resets = reset_mask
        .clone()
        .slice([0..batch, 1..time])
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();
    resets > 0
}
