//! Merging and restoring leading outer dimensions
//!
//! Dense and conv layers only understand a single leading batch dim, while the
//! network is called with `[batch]` or `[batch, time]` outer dims. `BatchSquash`
//! records the outer shape, merges it into one dim for the layer stack and
//! restores it afterwards:
//!
//! ```text
//! [B, T, C, H, W] --flatten--> [B*T, C, H, W] --layers--> [B*T, F] --unflatten--> [B, T, F]
//! ```

use burn::tensor::{Tensor, backend::Backend};

use super::error::{NetworkError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSquash {
    outer_dims: Vec<usize>,
}

impl BatchSquash {
    /// Record the leading outer dims, e.g. `[batch]` or `[batch, time]`
    pub fn new(outer_dims: &[usize]) -> Self {
        Self {
            outer_dims: outer_dims.to_vec(),
        }
    }

    pub fn outer_rank(&self) -> usize {
        self.outer_dims.len()
    }

    /// Size of the merged leading dim
    pub fn flat_size(&self) -> usize {
        self.outer_dims.iter().product()
    }

    /// Merge the outer dims into one, keeping inner dims
    ///
    /// Requires `D2 == D - outer_rank + 1` and that the tensor's leading dims
    /// match the recorded outer dims.
    pub fn flatten<B: Backend, const D: usize, const D2: usize>(
        &self,
        tensor: Tensor<B, D>,
    ) -> Result<Tensor<B, D2>> {
        let outer = self.outer_rank();
        if D < outer || D2 + outer != D + 1 {
            return Err(NetworkError::SquashRank { from: D, to: D2, outer });
        }
        let dims = tensor.dims();
        self.check_leading(&dims[..outer])?;

        let mut shape = [0usize; D2];
        shape[0] = self.flat_size();
        shape[1..].copy_from_slice(&dims[outer..]);
        Ok(tensor.reshape(shape))
    }

    /// Merge the outer dims into one and flatten every inner dim
    ///
    /// `[B, T, d1, d2, ...]` becomes `[B*T, d1*d2*...]`.
    pub fn flatten_features<B: Backend, const D: usize>(
        &self,
        tensor: Tensor<B, D>,
    ) -> Result<Tensor<B, 2>> {
        let outer = self.outer_rank();
        if D < outer {
            return Err(NetworkError::SquashRank { from: D, to: 2, outer });
        }
        let dims = tensor.dims();
        self.check_leading(&dims[..outer])?;

        let features = dims[outer..].iter().product();
        Ok(tensor.reshape([self.flat_size(), features]))
    }

    /// Restore the recorded outer dims on a tensor with one merged leading dim
    ///
    /// Requires `D2 == D - 1 + outer_rank`.
    pub fn unflatten<B: Backend, const D: usize, const D2: usize>(
        &self,
        tensor: Tensor<B, D>,
    ) -> Result<Tensor<B, D2>> {
        let outer = self.outer_rank();
        if D == 0 || D2 + 1 != D + outer {
            return Err(NetworkError::SquashRank { from: D, to: D2, outer });
        }
        let dims = tensor.dims();
        if dims[0] != self.flat_size() {
            return Err(NetworkError::ObservationShape {
                expected: vec![self.flat_size()],
                actual: vec![dims[0]],
            });
        }

        let mut shape = [0usize; D2];
        shape[..outer].copy_from_slice(&self.outer_dims);
        shape[outer..].copy_from_slice(&dims[1..]);
        Ok(tensor.reshape(shape))
    }

    fn check_leading(&self, leading: &[usize]) -> Result<()> {
        if leading != self.outer_dims.as_slice() {
            return Err(NetworkError::ObservationShape {
                expected: self.outer_dims.clone(),
                actual: leading.to_vec(),
            });
        }
        Ok(())
    }
}
