//! `MeshContext`: the per-process owner of all mesh state.
//!
//! A context bundles the transport, the [`MeshConfig`], the
//! [`GroupRegistry`], the [`MeshResources`] tracker and the counter that mints
//! mesh identities. It is created once per process at bootstrap and every
//! mesh construction or slicing call goes through it.
//!
//! Construction is SPMD: every rank of the world must call the same
//! constructors with the same arguments in the same order. All validation
//! happens before the first group-creation collective, so a bad shape or name
//! list fails on every rank without leaving any rank blocked.

use crate::algs::communicator::LocalComm;
use crate::algs::transport::{CommTransport, Transport};
use crate::algs::wire::rank_fingerprint;
use crate::config::MeshConfig;
use crate::mesh_error::MeshError;
use crate::topology::group::GroupHandle;
use crate::topology::group_registry::GroupRegistry;
use crate::topology::layout::MeshLayout;
use crate::topology::mesh::{DeviceKind, Mesh, MeshId};
use crate::topology::resources::MeshResources;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a mesh is built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MeshSpec {
    /// Ranks `0..prod(shape)` in row-major order.
    Shape(Vec<usize>),
    /// An explicit rank layout.
    Layout(MeshLayout),
}

impl From<&[usize]> for MeshSpec {
    fn from(shape: &[usize]) -> Self {
        MeshSpec::Shape(shape.to_vec())
    }
}

impl From<MeshLayout> for MeshSpec {
    fn from(layout: MeshLayout) -> Self {
        MeshSpec::Layout(layout)
    }
}

/// Per-process mesh state.
pub struct MeshContext<T: Transport> {
    transport: T,
    config: MeshConfig,
    registry: GroupRegistry,
    resources: MeshResources,
    world: GroupHandle,
    next_serial: AtomicU64,
}

/// Context over the in-process backend.
pub type LocalContext = MeshContext<CommTransport<LocalComm>>;

impl<T: Transport> MeshContext<T> {
    /// Set up the context and create the world group. Collective over the
    /// whole world.
    pub fn bootstrap(transport: T, config: MeshConfig) -> Result<Self, MeshError> {
        let registry = GroupRegistry::new();
        let everyone: Vec<usize> = (0..transport.world_size()).collect();
        let world = registry.get_or_create(&transport, &config.default_tag, &everyone)?;
        log::debug!(
            "rank {} bootstrapped a world of {} ranks",
            transport.rank(),
            everyone.len()
        );
        Ok(Self {
            transport,
            config,
            registry,
            resources: MeshResources::new(),
            world,
            next_serial: AtomicU64::new(0),
        })
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    pub fn world_size(&self) -> usize {
        self.transport.world_size()
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }

    pub fn resources(&self) -> &MeshResources {
        &self.resources
    }

    /// The group spanning every rank.
    pub fn world_group(&self) -> &GroupHandle {
        &self.world
    }

    /// Register a group over `ranks` under the default tag, creating it on
    /// first use. Every rank must call this, member or not.
    pub fn new_group(&self, ranks: &[usize]) -> Result<GroupHandle, MeshError> {
        MeshLayout::from_ranks(ranks.to_vec())?.check_world(self.world_size())?;
        self.registry
            .get_or_create(&self.transport, &self.config.default_tag, ranks)
    }

    /// Mesh over ranks `0..prod(shape)` laid out row-major.
    pub fn init_mesh(
        &self,
        device_kind: impl Into<DeviceKind>,
        shape: &[usize],
        dim_names: Option<&[&str]>,
    ) -> Result<Mesh, MeshError> {
        self.build_mesh(device_kind, MeshSpec::Shape(shape.to_vec()), dim_names)
    }

    /// Mesh over an explicit layout.
    pub fn mesh_from_layout(
        &self,
        device_kind: impl Into<DeviceKind>,
        layout: MeshLayout,
        dim_names: Option<&[&str]>,
    ) -> Result<Mesh, MeshError> {
        self.build_mesh(device_kind, MeshSpec::Layout(layout), dim_names)
    }

    /// Build a root mesh, resolving one group per dimension.
    ///
    /// Every rank registers every rank subset of every dimension, in
    /// [`group_plan`](crate::topology::layout::group_plan) order, so group
    /// ids agree across ranks. Subsets that were already registered (by an
    /// earlier mesh or [`Self::new_group`]) are reused.
    pub fn build_mesh(
        &self,
        device_kind: impl Into<DeviceKind>,
        spec: MeshSpec,
        dim_names: Option<&[&str]>,
    ) -> Result<Mesh, MeshError> {
        let ndim = match &spec {
            MeshSpec::Shape(shape) => shape.len(),
            MeshSpec::Layout(layout) => layout.ndim(),
        };
        let names = validate_names(&spec, ndim, dim_names)?;
        let layout = match spec {
            MeshSpec::Shape(shape) => MeshLayout::from_shape(&shape)?,
            MeshSpec::Layout(layout) => layout,
        };
        layout.check_world(self.world_size())?;

        let dim_groups = self.registry.resolve_mesh_groups(
            &self.transport,
            &self.config.default_tag,
            &layout,
        )?;

        let mesh = Mesh::assemble(
            self.mint_id(&layout),
            device_kind.into(),
            layout,
            names,
            self.rank(),
            dim_groups,
        );
        self.resources.register_root(&mesh);
        log::debug!("rank {} built {mesh}", self.rank());
        Ok(mesh)
    }

    fn mint_id(&self, layout: &MeshLayout) -> MeshId {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let mut digest = layout.ranks().to_vec();
        digest.push(layout.ndim());
        MeshId::new(serial, rank_fingerprint(&digest))
    }

    /// The child of `mesh` along the single dimension `name`.
    ///
    /// A 1-D mesh sliced by its own name is returned as is.
    pub fn slice(&self, mesh: &Mesh, name: &str) -> Result<Mesh, MeshError> {
        self.slice_dims(mesh, &[name])
    }

    /// The child of `mesh` keeping the dimensions `names` (in mesh order) and
    /// fixing the others at this rank's coordinate. Slicing by every
    /// dimension returns `mesh` itself. Repeated calls return the same child.
    ///
    /// No collective runs: the child reuses `mesh`'s groups.
    pub fn slice_dims(&self, mesh: &Mesh, names: &[&str]) -> Result<Mesh, MeshError> {
        let ndim = mesh.ndim();
        if names.is_empty() {
            return Err(MeshError::CannotSlice {
                ndim,
                name: String::new(),
            });
        }
        if ndim < 2 {
            // A 1-D mesh can only be "sliced" into itself.
            return match (mesh.dim_names(), names) {
                (Some([own]), [name]) if own == name => Ok(mesh.clone()),
                _ => Err(MeshError::CannotSlice {
                    ndim,
                    name: names.join(","),
                }),
            };
        }
        let declared = mesh.dim_names().ok_or(MeshError::NoDimNames)?;
        let keep = names
            .iter()
            .map(|&name| match declared.iter().position(|n| n == name) {
                Some(d) => Ok(d),
                None => Err(MeshError::DimNameNotFound {
                    name: name.to_owned(),
                    valid: declared.to_vec(),
                }),
            })
            .collect::<Result<Vec<usize>, _>>()?;
        if !keep.windows(2).all(|w| w[0] < w[1]) {
            return Err(MeshError::CannotSlice {
                ndim,
                name: names.join(","),
            });
        }
        if keep.len() == ndim {
            return Ok(mesh.clone());
        }
        let coord = mesh
            .coordinate()
            .ok_or(MeshError::NotInMesh { rank: mesh.rank() })?
            .to_vec();

        self.resources.child_or_insert_with(mesh, &keep, || {
            let layout = mesh.layout().restrict(&coord, &keep)?;
            let groups = keep.iter().map(|&d| mesh.groups()[d].clone()).collect();
            let child_names = keep.iter().map(|&d| declared[d].clone()).collect();
            let child = Mesh::assemble(
                self.mint_id(&layout),
                mesh.device_kind().clone(),
                layout,
                child_names,
                mesh.rank(),
                groups,
            );
            log::debug!("rank {} sliced {names:?} of {} into {child}", self.rank(), mesh.id());
            Ok(child)
        })
    }

    /// The mesh `mesh` was sliced from, if it is a live slice.
    pub fn parent_mesh(&self, mesh: &Mesh) -> Option<Mesh> {
        self.resources.get_parent(mesh)
    }

    /// The parent dimension a single-dimension slice was taken along.
    pub fn parent_dim(&self, mesh: &Mesh) -> Option<usize> {
        self.resources.get_parent_dim(mesh)
    }

    /// Index of `name` among the dimensions of `mesh`'s root.
    pub fn dim_index_by_name(&self, mesh: &Mesh, name: &str) -> Result<usize, MeshError> {
        self.resources.dim_index_by_name(mesh, name)
    }
}

fn validate_names(
    spec: &MeshSpec,
    ndim: usize,
    dim_names: Option<&[&str]>,
) -> Result<Vec<String>, MeshError> {
    let Some(names) = dim_names else {
        return Ok(Vec::new());
    };
    let owned: Vec<String> = names.iter().map(|s| (*s).to_owned()).collect();
    if names.len() != ndim {
        let shape = match spec {
            MeshSpec::Shape(shape) => shape.clone(),
            MeshSpec::Layout(layout) => layout.shape().to_vec(),
        };
        return Err(MeshError::ShapeNameMismatch {
            shape,
            names: owned,
        });
    }
    if names.iter().enumerate().any(|(i, n)| names[..i].contains(n)) {
        return Err(MeshError::DuplicateDimNames { names: owned });
    }
    Ok(owned)
}

/// Run `f` once per rank of an in-process world of `world_size` ranks, each
/// on its own thread with its own bootstrapped [`LocalContext`]. Results come
/// back in rank order; a panic on any rank is re-raised.
pub fn run_local<R, F>(world_size: usize, config: &MeshConfig, f: F) -> Vec<Result<R, MeshError>>
where
    R: Send,
    F: Fn(&LocalContext) -> Result<R, MeshError> + Sync,
{
    let comms = LocalComm::universe_with_timeout(world_size, config.recv_timeout());
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                s.spawn(move || {
                    let transport = CommTransport::with_config(comm, config);
                    let ctx = MeshContext::bootstrap(transport, config.clone())?;
                    f(&ctx)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
            .collect()
    })
}
