//! Episode step markers and the recurrent reset mask derived from them

use burn::tensor::{Bool, Int, Tensor, TensorData, backend::Backend};
use serde::{Deserialize, Serialize};

use super::error::{NetworkError, Result};

/// Position of a time step within its episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum StepType {
    /// First step of an episode; recurrent state is reset here
    First = 0,
    Mid = 1,
    /// Terminal step
    Last = 2,
}

impl StepType {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Whether recurrent state must be reset before this step
    pub fn is_first(self) -> bool {
        self == StepType::First
    }
}

/// Mask that is true exactly where `step_type` equals [`StepType::First`]
pub fn reset_mask<B: Backend, const D: usize>(step_type: Tensor<B, D, Int>) -> Tensor<B, D, Bool> {
    step_type.equal_elem(StepType::First.as_i32())
}

/// Build a `[batch, time]` step type tensor from one slice per batch row
///
/// # Errors
///
/// Returns [`NetworkError::StepTypeShape`] when rows differ in length.
pub fn step_type_tensor<B: Backend>(
    rows: &[Vec<StepType>],
    device: &B::Device,
) -> Result<Tensor<B, 2, Int>> {
    let batch = rows.len();
    let time = rows.first().map_or(0, Vec::len);

    let mut flat = Vec::with_capacity(batch * time);
    for row in rows {
        if row.len() != time {
            return Err(NetworkError::StepTypeShape {
                expected: vec![batch, time],
                actual: vec![batch, row.len()],
            });
        }
        flat.extend(row.iter().map(|step| step.as_i32()));
    }

    Ok(Tensor::from_ints(TensorData::new(flat, [batch, time]), device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    fn mask_values<const D: usize>(mask: Tensor<TestBackend, D, Bool>) -> Vec<bool> {
        mask.int().into_data().iter::<i64>().map(|v| v != 0).collect()
    }

    #[test]
    fn test_step_type_values() {
        assert_eq!(StepType::First.as_i32(), 0);
        assert_eq!(StepType::Mid.as_i32(), 1);
        assert_eq!(StepType::Last.as_i32(), 2);
        assert!(StepType::First.is_first());
        assert!(!StepType::Last.is_first());
    }

    #[test]
    fn test_reset_mask_marks_first_steps() {
        let device = NdArrayDevice::default();
        let rows = vec![
            vec![StepType::First, StepType::Mid, StepType::Last],
            vec![StepType::Mid, StepType::Last, StepType::First],
        ];
        let step_type = step_type_tensor::<TestBackend>(&rows, &device).unwrap();
        assert_eq!(step_type.dims(), [2, 3]);

        let values = mask_values(reset_mask(step_type));
        assert_eq!(values, vec![true, false, false, false, false, true]);
    }

    #[test]
    fn test_reset_mask_batch_only() {
        let device = NdArrayDevice::default();
        let step_type = Tensor::<TestBackend, 1, Int>::from_ints([1, 0, 2], &device);

        let values = mask_values(reset_mask(step_type));
        assert_eq!(values, vec![false, true, false]);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let device = NdArrayDevice::default();
        let rows = vec![vec![StepType::First, StepType::Mid], vec![StepType::First]];

        let err = step_type_tensor::<TestBackend>(&rows, &device).unwrap_err();
        assert!(matches!(err, NetworkError::StepTypeShape { .. }));
    }

    #[test]
    fn test_step_type_serde() {
        let json = serde_json::to_string(&StepType::First).unwrap();
        let back: StepType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StepType::First);
    }
}
