//! `Mesh`: an immutable N-dimensional grid of ranks with one resolved group
//! per dimension.
//!
//! Meshes are built by a [`MeshContext`](crate::topology::context::MeshContext)
//! (from a shape, an explicit layout, or by slicing another mesh) and never
//! change afterwards. Cloning a `Mesh` is cheap and keeps its identity.
//!
//! Two notions of sameness coexist:
//! - `==` is *structural*: same layout and same dimension names.
//! - [`Mesh::id`] is an opaque token minted per construction. Two meshes
//!   built separately from the same shape compare equal but have different
//!   ids. Registries key on the id. `Mesh` does not implement
//!   `Hash`; hash a [`MeshId`] or the layout instead.

use crate::mesh_error::MeshError;
use crate::topology::group::GroupHandle;
use crate::topology::layout::MeshLayout;
use std::fmt;
use std::sync::{Arc, Weak};

/// Per-construction identity of a mesh.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId {
    serial: u64,
    fingerprint: u64,
}

impl MeshId {
    pub(crate) fn new(serial: u64, fingerprint: u64) -> Self {
        Self { serial, fingerprint }
    }

    /// Position in the owning context's construction sequence.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Digest of the layout contents and dimension count.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh#{}:{:016x}", self.serial, self.fingerprint)
    }
}

/// Opaque compute-resource class ("cpu", "cuda", ...). Never interpreted.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceKind(String);

impl DeviceKind {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceKind {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for DeviceKind {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A mesh dimension, by index or by declared name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MeshDim<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for MeshDim<'_> {
    fn from(d: usize) -> Self {
        MeshDim::Index(d)
    }
}

impl<'a> From<&'a str> for MeshDim<'a> {
    fn from(name: &'a str) -> Self {
        MeshDim::Name(name)
    }
}

impl<'a> From<&'a String> for MeshDim<'a> {
    fn from(name: &'a String) -> Self {
        MeshDim::Name(name)
    }
}

pub(crate) struct MeshInner {
    id: MeshId,
    device_kind: DeviceKind,
    layout: MeshLayout,
    dim_names: Vec<String>,
    rank: usize,
    coordinate: Option<Vec<usize>>,
    dim_groups: Vec<GroupHandle>,
}

/// Immutable device mesh.
#[derive(Clone)]
pub struct Mesh {
    inner: Arc<MeshInner>,
}

/// Non-owning reference used by the resource tracker.
#[derive(Clone)]
pub(crate) struct WeakMesh(Weak<MeshInner>);

impl WeakMesh {
    pub(crate) fn upgrade(&self) -> Option<Mesh> {
        self.0.upgrade().map(|inner| Mesh { inner })
    }
}

impl Mesh {
    /// Assemble a mesh from already-resolved parts. `dim_groups` is either
    /// empty (rank outside the layout) or holds one group per dimension.
    pub(crate) fn assemble(
        id: MeshId,
        device_kind: DeviceKind,
        layout: MeshLayout,
        dim_names: Vec<String>,
        rank: usize,
        dim_groups: Vec<GroupHandle>,
    ) -> Self {
        let coordinate = layout.coordinate_of(rank);
        debug_assert!(dim_groups.is_empty() || dim_groups.len() == layout.ndim());
        Self {
            inner: Arc::new(MeshInner {
                id,
                device_kind,
                layout,
                dim_names,
                rank,
                coordinate,
                dim_groups,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakMesh {
        WeakMesh(Arc::downgrade(&self.inner))
    }

    pub fn id(&self) -> MeshId {
        self.inner.id
    }

    pub fn device_kind(&self) -> &DeviceKind {
        &self.inner.device_kind
    }

    pub fn layout(&self) -> &MeshLayout {
        &self.inner.layout
    }

    pub fn shape(&self) -> &[usize] {
        self.inner.layout.shape()
    }

    pub fn ndim(&self) -> usize {
        self.inner.layout.ndim()
    }

    /// Declared dimension names, or `None` if the mesh has none.
    pub fn dim_names(&self) -> Option<&[String]> {
        if self.inner.dim_names.is_empty() {
            None
        } else {
            Some(&self.inner.dim_names)
        }
    }

    /// Global rank of this process.
    pub fn rank(&self) -> usize {
        self.inner.rank
    }

    /// This process's coordinate, or `None` when it is not in the mesh.
    pub fn coordinate(&self) -> Option<&[usize]> {
        self.inner.coordinate.as_deref()
    }

    pub fn contains(&self, rank: usize) -> bool {
        self.inner.layout.contains(rank)
    }

    /// Same construction (and therefore the same identity).
    pub fn ptr_eq(a: &Mesh, b: &Mesh) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Resolve a dimension reference to an index.
    pub fn dim_index<'a>(&self, dim: impl Into<MeshDim<'a>>) -> Result<usize, MeshError> {
        match dim.into() {
            MeshDim::Index(d) if d < self.ndim() => Ok(d),
            MeshDim::Index(d) => Err(MeshError::DimOutOfRange {
                dim: d,
                ndim: self.ndim(),
            }),
            MeshDim::Name(name) => {
                let names = self.dim_names().ok_or(MeshError::NoDimNames)?;
                names
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| MeshError::DimNameNotFound {
                        name: name.to_owned(),
                        valid: names.to_vec(),
                    })
            }
        }
    }

    /// Number of ranks along `dim`, or in the whole mesh for `None`.
    pub fn size(&self, dim: Option<MeshDim<'_>>) -> Result<usize, MeshError> {
        match dim {
            None => Ok(self.inner.layout.numel()),
            Some(d) => Ok(self.shape()[self.dim_index(d)?]),
        }
    }

    /// The group spanning `dim` that contains this process.
    pub fn group<'a>(&self, dim: impl Into<MeshDim<'a>>) -> Result<&GroupHandle, MeshError> {
        let d = self.dim_index(dim)?;
        self.inner.dim_groups.get(d).ok_or(MeshError::NotInMesh {
            rank: self.inner.rank,
        })
    }

    /// One group per dimension; empty when this process is not in the mesh.
    pub fn groups(&self) -> &[GroupHandle] {
        &self.inner.dim_groups
    }

    /// Position of this process along `dim`. `dim` may only be omitted on a
    /// 1-D mesh.
    pub fn local_rank(&self, dim: Option<MeshDim<'_>>) -> Result<usize, MeshError> {
        let d = match dim {
            Some(d) => self.dim_index(d)?,
            None if self.ndim() == 1 => 0,
            None => return Err(MeshError::MissingDimArg { ndim: self.ndim() }),
        };
        self.coordinate()
            .map(|c| c[d])
            .ok_or(MeshError::NotInMesh {
                rank: self.inner.rank,
            })
    }
}

impl PartialEq for Mesh {
    fn eq(&self, other: &Self) -> bool {
        self.inner.layout == other.inner.layout && self.inner.dim_names == other.inner.dim_names
    }
}

impl Eq for Mesh {}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("id", &self.inner.id)
            .field("device_kind", &self.inner.device_kind.as_str())
            .field("shape", &self.shape())
            .field("ranks", &self.inner.layout.ranks())
            .field("dim_names", &self.inner.dim_names)
            .finish()
    }
}

impl fmt::Display for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mesh({}, shape={:?}, ranks={:?})",
            self.inner.device_kind.as_str(),
            self.shape(),
            self.inner.layout.ranks()
        )
    }
}
