//! Tensor: a dense, row-major n-dimensional buffer.
//!
//! This is the minimal array type the collectives move around: a shape plus
//! a contiguous `Vec<T>`. Every view-like operation (`narrow`, `chunk`, ...)
//! returns an owned, contiguous copy, so buffers handed to the transport are
//! always contiguous.

use crate::algs::wire::{cast_slice, cast_slice_mut};
use crate::mesh_error::MeshError;
use bytemuck::Pod;
use num_traits::Zero;
use std::fmt::Debug;

/// Scalar types a [`Tensor`] can hold and the transport can ship.
pub trait Element: Pod + Zero + PartialOrd + Send + Sync + Debug {
    /// Addition used by [`ReduceOp::Sum`]. Integers wrap on overflow.
    fn reduce_add(self, other: Self) -> Self;
}

macro_rules! wrapping_element {
    ($($t:ty),*) => {$(
        impl Element for $t {
            fn reduce_add(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
        }
    )*};
}

macro_rules! float_element {
    ($($t:ty),*) => {$(
        impl Element for $t {
            fn reduce_add(self, other: Self) -> Self {
                self + other
            }
        }
    )*};
}

wrapping_element!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);
float_element!(f32, f64);

/// Associative element-wise reduction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    /// `acc[i] = op(acc[i], other[i])`.
    pub fn apply<T: Element>(self, acc: &mut [T], other: &[T]) {
        for (a, &b) in acc.iter_mut().zip(other) {
            *a = match self {
                ReduceOp::Sum => a.reduce_add(b),
                ReduceOp::Min if b < *a => b,
                ReduceOp::Max if b > *a => b,
                _ => *a,
            };
        }
    }
}

/// Dense row-major tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Element> Tensor<T> {
    /// Wrap `data` with `shape`; the element counts must agree.
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self, MeshError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(MeshError::LengthMismatch {
                expected,
                found: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, T::zero())
    }

    pub fn full(shape: &[usize], value: T) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![value; shape.iter().product()],
        }
    }

    /// Build from a function of the flat (row-major) index.
    pub fn from_fn(shape: &[usize], f: impl FnMut(usize) -> T) -> Self {
        let n: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: (0..n).map(f).collect(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Extent of dimension `dim`.
    pub fn dim_size(&self, dim: usize) -> Result<usize, MeshError> {
        self.shape.get(dim).copied().ok_or_else(|| {
            MeshError::TensorShape(format!(
                "dimension {dim} out of range for shape {:?}",
                self.shape
            ))
        })
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        cast_slice(&self.data)
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        cast_slice_mut(&mut self.data)
    }

    /// `(outer, extent, inner)` around `dim`: the data is `outer` blocks of
    /// `extent * inner` elements.
    fn split_at_dim(&self, dim: usize) -> Result<(usize, usize, usize), MeshError> {
        let extent = self.dim_size(dim)?;
        let outer = self.shape[..dim].iter().product();
        let inner = self.shape[dim + 1..].iter().product();
        Ok((outer, extent, inner))
    }

    /// Copy of `len` entries along `dim` starting at `start`.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self, MeshError> {
        let (outer, extent, inner) = self.split_at_dim(dim)?;
        if start + len > extent {
            return Err(MeshError::TensorShape(format!(
                "narrow({dim}, {start}, {len}) exceeds extent {extent}"
            )));
        }
        let mut data = Vec::with_capacity(outer * len * inner);
        for o in 0..outer {
            let base = (o * extent + start) * inner;
            data.extend_from_slice(&self.data[base..base + len * inner]);
        }
        let mut shape = self.shape.clone();
        shape[dim] = len;
        Ok(Self { shape, data })
    }

    /// Concatenate along `dim`. All parts must agree on every other extent.
    pub fn cat(parts: &[Tensor<T>], dim: usize) -> Result<Self, MeshError> {
        let first = parts
            .first()
            .ok_or_else(|| MeshError::TensorShape("cannot concatenate zero tensors".into()))?;
        let (outer, _, inner) = first.split_at_dim(dim)?;
        for p in parts {
            let same_rank = p.ndim() == first.ndim();
            let same_rest = same_rank
                && p.shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(d, (a, b))| d == dim || a == b);
            if !same_rest {
                return Err(MeshError::TensorShape(format!(
                    "cannot concatenate {:?} with {:?} along {dim}",
                    p.shape, first.shape
                )));
            }
        }
        let total: usize = parts.iter().map(|p| p.shape[dim]).sum();
        let mut data = Vec::with_capacity(outer * total * inner);
        for o in 0..outer {
            for p in parts {
                let block = p.shape[dim] * inner;
                data.extend_from_slice(&p.data[o * block..(o + 1) * block]);
            }
        }
        let mut shape = first.shape.clone();
        shape[dim] = total;
        Ok(Self { shape, data })
    }

    /// Split into chunks of `ceil(extent / n)` along `dim`. The last chunk
    /// may be shorter, and fewer than `n` chunks come back when the extent
    /// runs out early.
    pub fn chunk(&self, n: usize, dim: usize) -> Result<Vec<Self>, MeshError> {
        if n == 0 {
            return Err(MeshError::TensorShape("cannot chunk into 0 pieces".into()));
        }
        let extent = self.dim_size(dim)?;
        if extent == 0 {
            return Ok(vec![self.clone()]);
        }
        let size = extent.div_ceil(n);
        (0..extent)
            .step_by(size)
            .map(|start| self.narrow(dim, start, size.min(extent - start)))
            .collect()
    }

    /// Append `pad` zero entries along `dim`.
    pub fn pad_dim(&self, dim: usize, pad: usize) -> Result<Self, MeshError> {
        if pad == 0 {
            self.dim_size(dim)?;
            return Ok(self.clone());
        }
        let mut zshape = self.shape.clone();
        zshape[dim] = pad;
        Self::cat(&[self.clone(), Self::zeros(&zshape)], dim)
    }

    /// Drop the last `pad` entries along `dim`.
    pub fn unpad_dim(&self, dim: usize, pad: usize) -> Result<Self, MeshError> {
        let extent = self.dim_size(dim)?;
        if pad > extent {
            return Err(MeshError::TensorShape(format!(
                "cannot remove {pad} padding entries from extent {extent}"
            )));
        }
        if pad == 0 {
            return Ok(self.clone());
        }
        self.narrow(dim, 0, extent - pad)
    }
}
