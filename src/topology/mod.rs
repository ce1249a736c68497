//! Top-level module for mesh topology.
//!
//! This module provides:
//! - Rank layouts and the deterministic per-dimension group plan
//! - An offline replay of group registration as every rank
//! - Group handles and the group registry
//! - The immutable [`Mesh`] and the parent/child resource tracker
//! - [`MeshContext`], which owns all of the above for one process
//!
//! Most users will build meshes through [`MeshContext::init_mesh`] and slice
//! them with [`MeshContext::slice`].

pub mod context;
pub mod group;
pub mod group_registry;
pub mod layout;
pub mod mesh;
pub mod replay;
pub mod resources;

pub use context::{LocalContext, MeshContext, MeshSpec, run_local};
pub use group::{GroupHandle, GroupId};
pub use group_registry::GroupRegistry;
pub use layout::{MeshLayout, PlanStep, group_plan};
pub use mesh::{DeviceKind, Mesh, MeshDim, MeshId};
pub use replay::{RankPlan, simulate_plans, verify_plans};
pub use resources::{MeshRecord, MeshResources};
