//! Even splitting with zero padding along one tensor dimension.
//!
//! When an axis of extent `d` is split over `n` members and `n` does not
//! divide `d`, every chunk is padded with zeros up to `ceil(d / n)` and the
//! per-member pad amount is recorded. Receivers strip exactly that amount.
//! Splitting with padding and concatenating after unpadding reproduces the
//! original tensor bit for bit.

use crate::data::tensor::{Element, Tensor};
use crate::mesh_error::MeshError;

/// Sharding along a single tensor dimension.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shard {
    pub dim: usize,
}

impl Shard {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Unpadded chunk lengths for an extent of `extent` over `n` members.
    pub fn chunk_sizes(extent: usize, n: usize) -> Vec<usize> {
        let full = extent.div_ceil(n.max(1));
        (0..n)
            .map(|i| extent.saturating_sub(i * full).min(full))
            .collect()
    }

    /// Split `tensor` into exactly `n` chunks along `self.dim`.
    ///
    /// Chunks past the end of the axis come back empty. With `with_padding`
    /// every chunk is zero-padded to the full chunk size and the returned pad
    /// sizes say how much; without it all pad sizes are 0.
    pub fn split_tensor<T: Element>(
        &self,
        tensor: &Tensor<T>,
        n: usize,
        with_padding: bool,
    ) -> Result<(Vec<Tensor<T>>, Vec<usize>), MeshError> {
        let mut chunks = tensor.chunk(n, self.dim)?;
        let extent = tensor.dim_size(self.dim)?;
        chunks.truncate(n);
        while chunks.len() < n {
            chunks.push(tensor.narrow(self.dim, 0, 0)?);
        }
        if !with_padding {
            return Ok((chunks, vec![0; n]));
        }

        let full = extent.div_ceil(n);
        let mut pad_sizes = Vec::with_capacity(n);
        let padded = chunks
            .iter()
            .map(|c| {
                let pad = full - c.dim_size(self.dim)?;
                pad_sizes.push(pad);
                self.pad_tensor(c, pad)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((padded, pad_sizes))
    }

    /// Append `pad` zeros along `self.dim`. Identity when `pad == 0`.
    pub fn pad_tensor<T: Element>(
        &self,
        tensor: &Tensor<T>,
        pad: usize,
    ) -> Result<Tensor<T>, MeshError> {
        tensor.pad_dim(self.dim, pad)
    }

    /// Strip the trailing `pad` entries along `self.dim`. Identity when `pad == 0`.
    pub fn unpad_tensor<T: Element>(
        &self,
        tensor: &Tensor<T>,
        pad: usize,
    ) -> Result<Tensor<T>, MeshError> {
        tensor.unpad_dim(self.dim, pad)
    }
}
