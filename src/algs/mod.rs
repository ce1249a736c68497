//! Communication: point-to-point backends, the group transport, and mesh
//! collectives.

pub mod collectives;
pub mod communicator;
pub mod transport;
pub mod wire;

pub use collectives::{
    mesh_all_gather, mesh_all_gather_padded, mesh_all_reduce, mesh_all_to_all, mesh_broadcast,
    mesh_reduce_scatter, mesh_scatter,
};
