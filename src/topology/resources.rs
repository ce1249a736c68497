//! `MeshResources`: parent/child relations and dimension-name tables.
//!
//! Records are keyed by [`MeshId`] and hold only identities and weak mesh
//! references, so a parent never owns its children through the record table
//! and dropping a mesh does not leak it. Sliced children live in a separate
//! cache keyed by `(parent id, kept dims)`, which is what makes repeated
//! slicing return the same mesh.
//!
//! Lock order: `children` before `records`.

use crate::mesh_error::MeshError;
use crate::topology::mesh::{Mesh, MeshId, WeakMesh};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Relation of one mesh to its hierarchy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshRecord {
    /// Mesh this one was sliced from; `None` for a root.
    pub parent: Option<MeshId>,
    /// Parent dimensions kept by the slice; `None` for a root.
    pub parent_dims: Option<Vec<usize>>,
    /// Root of the hierarchy (the mesh itself for a root).
    pub root: MeshId,
    /// Root dimension index of each of this mesh's dimensions.
    pub root_dims: Vec<usize>,
}

struct Entry {
    mesh: WeakMesh,
    record: MeshRecord,
}

type ChildKey = (MeshId, Vec<usize>);

/// Identity-keyed tracker of mesh hierarchies.
#[derive(Default)]
pub struct MeshResources {
    records: RwLock<HashMap<MeshId, Entry>>,
    root_names: DashMap<MeshId, Arc<HashMap<String, usize>>>,
    children: Mutex<HashMap<ChildKey, Mesh>>,
}

impl MeshResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `mesh` as the root of a new hierarchy and remember its names.
    pub fn register_root(&self, mesh: &Mesh) {
        if let Some(names) = mesh.dim_names() {
            let table = names
                .iter()
                .enumerate()
                .map(|(i, n)| (n.clone(), i))
                .collect();
            self.root_names.insert(mesh.id(), Arc::new(table));
        }
        let record = MeshRecord {
            parent: None,
            parent_dims: None,
            root: mesh.id(),
            root_dims: (0..mesh.ndim()).collect(),
        };
        self.records.write().insert(
            mesh.id(),
            Entry {
                mesh: mesh.downgrade(),
                record,
            },
        );
    }

    /// Record that `child` was sliced from `parent` along `parent_dim`.
    pub fn record_parent(&self, child: &Mesh, parent: &Mesh, parent_dim: usize) {
        self.record_slice(child, parent, &[parent_dim]);
    }

    /// Record that `child` keeps `parent_dims` of `parent`. An untracked
    /// parent is registered as a root first.
    pub fn record_slice(&self, child: &Mesh, parent: &Mesh, parent_dims: &[usize]) {
        if self.record(parent).is_none() {
            self.register_root(parent);
        }
        let mut records = self.records.write();
        let Some(parent_record) = records.get(&parent.id()).map(|e| e.record.clone()) else {
            return;
        };
        let record = MeshRecord {
            parent: Some(parent.id()),
            parent_dims: Some(parent_dims.to_vec()),
            root: parent_record.root,
            root_dims: parent_dims
                .iter()
                .map(|&d| parent_record.root_dims[d])
                .collect(),
        };
        records.insert(
            child.id(),
            Entry {
                mesh: child.downgrade(),
                record,
            },
        );
    }

    /// The record for `mesh`, if it is tracked.
    pub fn record(&self, mesh: &Mesh) -> Option<MeshRecord> {
        self.records
            .read()
            .get(&mesh.id())
            .map(|e| e.record.clone())
    }

    fn upgrade(&self, id: MeshId) -> Option<Mesh> {
        self.records.read().get(&id).and_then(|e| e.mesh.upgrade())
    }

    /// The mesh `child` was sliced from, while it is still alive.
    pub fn get_parent(&self, child: &Mesh) -> Option<Mesh> {
        let parent = self.record(child)?.parent?;
        self.upgrade(parent)
    }

    /// The parent dimension `child` was sliced from. Only single-dimension
    /// slices have one.
    pub fn get_parent_dim(&self, child: &Mesh) -> Option<usize> {
        match self.record(child)?.parent_dims?.as_slice() {
            [d] => Some(*d),
            _ => None,
        }
    }

    /// Root of `mesh`'s hierarchy, while it is still alive.
    pub fn root_of(&self, mesh: &Mesh) -> Option<Mesh> {
        let root = self.record(mesh)?.root;
        if root == mesh.id() {
            return Some(mesh.clone());
        }
        self.upgrade(root)
    }

    /// Index of `name` among the dimensions of `mesh`'s root.
    pub fn dim_index_by_name(&self, mesh: &Mesh, name: &str) -> Result<usize, MeshError> {
        let root = self.record(mesh).ok_or(MeshError::NoDimNames)?.root;
        let table = self
            .root_names
            .get(&root)
            .map(|t| Arc::clone(t.value()))
            .ok_or(MeshError::NoDimNames)?;
        table.get(name).copied().ok_or_else(|| {
            let mut valid: Vec<(usize, String)> =
                table.iter().map(|(n, &i)| (i, n.clone())).collect();
            valid.sort();
            MeshError::DimNameNotFound {
                name: name.to_owned(),
                valid: valid.into_iter().map(|(_, n)| n).collect(),
            }
        })
    }

    /// Cached child of `parent` keeping `dims`, built and recorded with
    /// `build` on first request.
    pub fn child_or_insert_with<F>(
        &self,
        parent: &Mesh,
        dims: &[usize],
        build: F,
    ) -> Result<Mesh, MeshError>
    where
        F: FnOnce() -> Result<Mesh, MeshError>,
    {
        let mut children = self.children.lock();
        let key = (parent.id(), dims.to_vec());
        if let Some(child) = children.get(&key) {
            log::trace!("reusing slice {:?} of {}", dims, parent.id());
            return Ok(child.clone());
        }
        let child = build()?;
        self.record_slice(&child, parent, dims);
        children.insert(key, child.clone());
        Ok(child)
    }

    /// Number of tracked meshes.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget meshes that are no longer alive, and cached children of dead
    /// parents. Returns how many records were dropped.
    pub fn prune(&self) -> usize {
        let mut children = self.children.lock();
        let mut records = self.records.write();
        // Children of dead parents are only reachable through the cache.
        children.retain(|(parent, _), _| {
            records
                .get(parent)
                .is_some_and(|e| e.mesh.upgrade().is_some())
        });
        let before = records.len();
        records.retain(|_, e| e.mesh.upgrade().is_some());
        let roots: HashSet<MeshId> = records.values().map(|e| e.record.root).collect();
        self.root_names.retain(|id, _| roots.contains(id));
        before - records.len()
    }
}
