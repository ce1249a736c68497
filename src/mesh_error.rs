//! MeshError: Unified error type for device-mesh public APIs
//!
//! Every fallible operation in the crate (mesh construction, slicing, group
//! creation, collectives) reports failures through [`MeshError`]. Errors are
//! always surfaced at the call that triggered them; nothing is retried or
//! swallowed, since a half-finished collective leaves remote ranks in an
//! indeterminate state.

use thiserror::Error;

/// Coarse classification of a [`MeshError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid shape, names, dimension index or mesh usage. Raised before any
    /// collective runs.
    Configuration,
    /// A dimension name that is not declared on the mesh.
    Lookup,
    /// The requested operation is not defined for this mesh.
    Unsupported,
    /// Failure reported by the communication layer. Fatal to the process.
    Transport,
    /// Buffers or tensors with inconsistent sizes.
    Data,
}

/// Unified error type for device-mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Shape and dimension names have different lengths.
    #[error("mesh shape {shape:?} and mesh dim names {names:?} should have same length")]
    ShapeNameMismatch {
        shape: Vec<usize>,
        names: Vec<String>,
    },
    /// The same dimension name was declared twice.
    #[error("each mesh dim name must be unique, got {names:?}")]
    DuplicateDimNames { names: Vec<String> },
    /// A mesh needs at least one dimension, and every dimension must be non-empty.
    #[error("invalid mesh shape {shape:?}: {reason}")]
    InvalidShape { shape: Vec<usize>, reason: &'static str },
    /// The explicit layout does not hold exactly `prod(shape)` ranks.
    #[error("mesh layout of shape {shape:?} needs {expected} ranks, got {found}")]
    LayoutSizeMismatch {
        shape: Vec<usize>,
        expected: usize,
        found: usize,
    },
    /// A rank appears more than once in a layout.
    #[error("rank {0} appears more than once in the mesh layout")]
    DuplicateRank(usize),
    /// A rank in a layout lies outside `[0, world_size)`.
    #[error("rank {rank} is outside the world of size {world_size}")]
    RankOutOfRange { rank: usize, world_size: usize },
    /// Dimension index not below the mesh's dimension count.
    #[error("mesh dimension {dim} out of range for a {ndim}-D mesh")]
    DimOutOfRange { dim: usize, ndim: usize },
    /// Slicing by name on a mesh that never declared names.
    #[error("no mesh dim names found on this mesh")]
    NoDimNames,
    /// The requested name is not one of the declared names.
    #[error("mesh dimension '{name}' does not exist, valid names are {valid:?}")]
    DimNameNotFound { name: String, valid: Vec<String> },
    /// Slicing a mesh with fewer than two dimensions by a foreign name.
    #[error("cannot slice a {ndim}-D mesh by '{name}': invalid mesh dim name")]
    CannotSlice { ndim: usize, name: String },
    /// A per-dimension query on an N-D mesh without naming the dimension.
    #[error("a mesh dimension must be specified when the mesh has {ndim} dimensions")]
    MissingDimArg { ndim: usize },
    /// The calling rank is not part of the mesh.
    #[error("rank {rank} is not a member of this mesh")]
    NotInMesh { rank: usize },
    /// A per-member list does not have one entry per group member.
    #[error("expected one entry per group member ({expected}), got {found}")]
    MemberCountMismatch { expected: usize, found: usize },
    /// Two buffers that must agree in length do not.
    #[error("buffer length mismatch: expected {expected} elements, got {found}")]
    LengthMismatch { expected: usize, found: usize },
    /// Tensor shape problem (bad dimension, incompatible concatenation, ...).
    #[error("tensor shape error: {0}")]
    TensorShape(String),
    /// Group members disagree about the group being created.
    #[error("group {group} creation mismatch: {detail}")]
    GroupMismatch { group: u64, detail: String },
    /// Point-to-point failure with a given peer.
    #[error("communication error with rank {peer}: {source}")]
    CommError {
        peer: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Malformed configuration value.
    #[error("invalid configuration value for {key}: {value:?}")]
    InvalidConfig { key: &'static str, value: String },
}

impl MeshError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use MeshError::*;
        match self {
            ShapeNameMismatch { .. }
            | DuplicateDimNames { .. }
            | InvalidShape { .. }
            | LayoutSizeMismatch { .. }
            | DuplicateRank(_)
            | RankOutOfRange { .. }
            | DimOutOfRange { .. }
            | NoDimNames
            | MissingDimArg { .. }
            | NotInMesh { .. }
            | InvalidConfig { .. } => ErrorKind::Configuration,
            DimNameNotFound { .. } => ErrorKind::Lookup,
            CannotSlice { .. } => ErrorKind::Unsupported,
            GroupMismatch { .. } | CommError { .. } => ErrorKind::Transport,
            MemberCountMismatch { .. } | LengthMismatch { .. } | TensorShape(_) => ErrorKind::Data,
        }
    }

    /// Shorthand for a [`MeshError::CommError`] with a message source.
    pub(crate) fn comm(peer: usize, msg: impl Into<String>) -> Self {
        MeshError::CommError {
            peer,
            source: msg.into().into(),
        }
    }
}
