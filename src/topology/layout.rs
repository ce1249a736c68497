//! `MeshLayout`: the N-dimensional array of global ranks behind a mesh.
//!
//! Ranks are stored flat in row-major order. All coordinate math and the
//! per-dimension group enumeration live here as pure functions of the layout,
//! so every rank derives the same groups in the same order.

use crate::mesh_error::MeshError;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Row-major rank layout with its shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshLayout {
    shape: Vec<usize>,
    ranks: Vec<usize>,
}

impl MeshLayout {
    /// Ranks `0..prod(shape)` laid out row-major.
    pub fn from_shape(shape: &[usize]) -> Result<Self, MeshError> {
        Self::check_shape(shape)?;
        let n = shape.iter().product();
        Ok(Self {
            shape: shape.to_vec(),
            ranks: (0..n).collect(),
        })
    }

    /// Explicit layout; `ranks` is read row-major against `shape`.
    pub fn new(shape: Vec<usize>, ranks: Vec<usize>) -> Result<Self, MeshError> {
        Self::check_shape(&shape)?;
        let expected: usize = shape.iter().product();
        if ranks.len() != expected {
            return Err(MeshError::LayoutSizeMismatch {
                shape,
                expected,
                found: ranks.len(),
            });
        }
        if let Some(&dup) = ranks.iter().duplicates().next() {
            return Err(MeshError::DuplicateRank(dup));
        }
        Ok(Self { shape, ranks })
    }

    /// One-dimensional layout over `ranks`.
    pub fn from_ranks(ranks: Vec<usize>) -> Result<Self, MeshError> {
        Self::new(vec![ranks.len()], ranks)
    }

    fn check_shape(shape: &[usize]) -> Result<(), MeshError> {
        if shape.is_empty() {
            return Err(MeshError::InvalidShape {
                shape: shape.to_vec(),
                reason: "a mesh needs at least one dimension",
            });
        }
        if shape.contains(&0) {
            return Err(MeshError::InvalidShape {
                shape: shape.to_vec(),
                reason: "every dimension must be positive",
            });
        }
        Ok(())
    }

    /// Every rank must lie in `[0, world_size)`.
    pub fn check_world(&self, world_size: usize) -> Result<(), MeshError> {
        match self.ranks.iter().find(|&&r| r >= world_size) {
            Some(&rank) => Err(MeshError::RankOutOfRange { rank, world_size }),
            None => Ok(()),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.ranks.len()
    }

    /// Flat row-major ranks.
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    pub fn contains(&self, rank: usize) -> bool {
        self.ranks.contains(&rank)
    }

    fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.shape.len()];
        for d in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * self.shape[d + 1];
        }
        strides
    }

    fn unravel(&self, mut flat: usize) -> Vec<usize> {
        let mut coord = vec![0; self.shape.len()];
        for d in (0..self.shape.len()).rev() {
            coord[d] = flat % self.shape[d];
            flat /= self.shape[d];
        }
        coord
    }

    fn ravel(&self, coord: &[usize]) -> Option<usize> {
        if coord.len() != self.shape.len() || coord.iter().zip(&self.shape).any(|(c, s)| c >= s) {
            return None;
        }
        Some(coord.iter().zip(self.strides()).map(|(c, s)| c * s).sum())
    }

    /// Rank at `coord`.
    pub fn rank_at(&self, coord: &[usize]) -> Option<usize> {
        self.ravel(coord).map(|i| self.ranks[i])
    }

    /// Coordinate of `rank`, if it is part of the layout.
    pub fn coordinate_of(&self, rank: usize) -> Option<Vec<usize>> {
        self.ranks
            .iter()
            .position(|&r| r == rank)
            .map(|i| self.unravel(i))
    }

    fn check_dim(&self, dim: usize) -> Result<(), MeshError> {
        if dim < self.ndim() {
            Ok(())
        } else {
            Err(MeshError::DimOutOfRange {
                dim,
                ndim: self.ndim(),
            })
        }
    }

    /// The ranks met by varying `dim` with every other coordinate as in `coord`.
    pub fn subset_containing(&self, dim: usize, coord: &[usize]) -> Result<Vec<usize>, MeshError> {
        self.check_dim(dim)?;
        let mut c = coord.to_vec();
        (0..self.shape[dim])
            .map(|i| {
                c[dim] = i;
                self.rank_at(&c).ok_or_else(|| {
                    MeshError::TensorShape(format!(
                        "coordinate {c:?} outside mesh shape {:?}",
                        self.shape
                    ))
                })
            })
            .collect()
    }

    /// Every rank subset along `dim`: `numel / shape[dim]` subsets of
    /// `shape[dim]` ranks, ordered by a row-major walk over the other
    /// coordinates.
    pub fn dim_subsets(&self, dim: usize) -> Result<Vec<Vec<usize>>, MeshError> {
        self.check_dim(dim)?;
        (0..self.numel())
            .map(|flat| self.unravel(flat))
            .filter(|coord| coord[dim] == 0)
            .map(|coord| self.subset_containing(dim, &coord))
            .collect()
    }

    /// Sub-layout keeping the dimensions in `keep` (strictly increasing) and
    /// fixing all others at `coord`.
    pub fn restrict(&self, coord: &[usize], keep: &[usize]) -> Result<Self, MeshError> {
        for &d in keep {
            self.check_dim(d)?;
        }
        if keep.is_empty() || !keep.windows(2).all(|w| w[0] < w[1]) {
            return Err(MeshError::TensorShape(format!(
                "kept dimensions {keep:?} must be non-empty and strictly increasing"
            )));
        }
        let sub_shape: Vec<usize> = keep.iter().map(|&d| self.shape[d]).collect();
        let n: usize = sub_shape.iter().product();
        let sub = Self {
            shape: sub_shape,
            ranks: vec![0; n],
        };
        let mut full = coord.to_vec();
        let ranks = (0..n)
            .map(|flat| {
                for (k, &d) in sub.unravel(flat).iter().zip(keep) {
                    full[d] = *k;
                }
                self.rank_at(&full).ok_or_else(|| {
                    MeshError::TensorShape(format!("coordinate {full:?} outside mesh"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            shape: sub.shape,
            ranks,
        })
    }
}

/// One group-creation step: the dimension and the rank subset it registers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanStep {
    pub dim: usize,
    pub ranks: Vec<usize>,
}

/// The exact sequence of group registrations mesh construction performs:
/// dimensions in order, subsets of each dimension in [`MeshLayout::dim_subsets`]
/// order. Depends on the layout only, never on the calling rank.
pub fn group_plan(layout: &MeshLayout) -> Result<Vec<PlanStep>, MeshError> {
    let mut plan = Vec::with_capacity(layout.ndim());
    for dim in 0..layout.ndim() {
        plan.extend(
            layout
                .dim_subsets(dim)?
                .into_iter()
                .map(|ranks| PlanStep { dim, ranks }),
        );
    }
    Ok(plan)
}
