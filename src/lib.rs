#![cfg_attr(docsrs, feature(doc_cfg))]
//! # device-mesh
//!
//! device-mesh arranges a flat world of cooperating ranks into an
//! N-dimensional logical grid (a *mesh*), derives the communication groups
//! implied by each grid dimension, caches and reuses them, and runs
//! collectives (broadcast, scatter, all-to-all, reduce-scatter, ...) along a
//! single mesh dimension with padding for uneven splits.
//!
//! ## Features
//! - Deterministic, rank-independent group enumeration (every rank derives
//!   the same groups in the same order without a coordinator)
//! - A group registry keyed by `(tag, ordered ranks)` so overlapping meshes
//!   share groups
//! - Named dimensions, cached sub-mesh slicing and parent/child lookups
//! - Pluggable communication backends (in-process, MPI)
//!
//! ## Execution model
//!
//! Programs are SPMD: every rank makes the same construction and collective
//! calls in the same order. All state lives in one [`MeshContext`] per
//! process, created at bootstrap:
//!
//! ```no_run
//! use device_mesh::prelude::*;
//!
//! let results = run_local(4, &MeshConfig::default(), |ctx| {
//!     let mesh = ctx.init_mesh("cpu", &[2, 2], Some(&["dp", "tp"]))?;
//!     let tp = ctx.slice(&mesh, "tp")?;
//!     Ok(tp.layout().ranks().to_vec())
//! });
//! assert_eq!(results[3].as_ref().unwrap(), &vec![2, 3]);
//! ```
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! device-mesh = "0.3"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```
//!
//! [`MeshContext`]: crate::topology::context::MeshContext

pub mod algs;
pub mod config;
pub mod data;
pub mod mesh_error;
pub mod topology;

pub use config::MeshConfig;
pub use mesh_error::{ErrorKind, MeshError};

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::collectives::{
        mesh_all_gather, mesh_all_gather_padded, mesh_all_reduce, mesh_all_to_all,
        mesh_broadcast, mesh_reduce_scatter, mesh_scatter,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    pub use crate::algs::transport::{CommTransport, Transport};
    pub use crate::config::MeshConfig;
    pub use crate::data::shard::Shard;
    pub use crate::data::tensor::{Element, ReduceOp, Tensor};
    pub use crate::mesh_error::{ErrorKind, MeshError};
    pub use crate::topology::context::{LocalContext, MeshContext, MeshSpec, run_local};
    pub use crate::topology::group::{GroupHandle, GroupId};
    pub use crate::topology::layout::MeshLayout;
    pub use crate::topology::mesh::{DeviceKind, Mesh, MeshDim, MeshId};
}
