//! Process-wide cache of communication groups keyed by `(tag, ordered ranks)`.
//!
//! Within one tag, the same ordered rank set always resolves to the same
//! [`GroupHandle`]; the transport's blocking `create_group` runs at most once
//! per distinct set. Every rank must register groups in the same order: the
//! registry hands out [`GroupId`]s from a counter, and those ids pick the tag
//! each group talks on.

use crate::algs::transport::Transport;
use crate::mesh_error::MeshError;
use crate::topology::group::{GroupHandle, GroupId};
use crate::topology::layout::{MeshLayout, group_plan};
use hashbrown::HashMap;
use parking_lot::Mutex;

type GroupKey = (String, Vec<usize>);

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    groups: HashMap<GroupKey, GroupHandle>,
    /// Registration order, used for deterministic introspection.
    order: Vec<GroupHandle>,
    creations: usize,
}

/// Insert-if-absent group cache. Safe to share between threads of one process.
#[derive(Default)]
pub struct GroupRegistry {
    state: Mutex<RegistryState>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached group for `(tag, ranks)`, creating it through
    /// `transport` on first use.
    ///
    /// Every rank of the world must make this call for every rank set, in the
    /// same order, whether or not it is a member. Only members take part in
    /// the transport's creation collective.
    pub fn get_or_create<T>(
        &self,
        transport: &T,
        tag: &str,
        ranks: &[usize],
    ) -> Result<GroupHandle, MeshError>
    where
        T: Transport + ?Sized,
    {
        let mut state = self.state.lock();
        let key = (tag.to_owned(), ranks.to_vec());
        if let Some(found) = state.groups.get(&key) {
            log::trace!("reusing group {} for ranks {:?}", found.id(), ranks);
            return Ok(found.clone());
        }

        let id = GroupId(state.next_id);
        state.next_id += 1;
        let handle = GroupHandle::new(id, tag, ranks.to_vec(), transport.rank());
        if handle.is_member() {
            log::debug!("creating group {id} (tag {tag:?}) over ranks {ranks:?}");
            // The lock stays held: concurrent callers must not race a second
            // creation of the same set.
            transport.create_group(&handle)?;
            state.creations += 1;
        }
        state.groups.insert(key, handle.clone());
        state.order.push(handle.clone());
        Ok(handle)
    }

    /// Register every step of `layout`'s [`group_plan`] under `tag` and keep
    /// the groups this process belongs to, one per dimension. Empty when the
    /// process is outside the layout.
    pub fn resolve_mesh_groups<T>(
        &self,
        transport: &T,
        tag: &str,
        layout: &MeshLayout,
    ) -> Result<Vec<GroupHandle>, MeshError>
    where
        T: Transport + ?Sized,
    {
        let mut dim_groups = Vec::with_capacity(layout.ndim());
        for step in group_plan(layout)? {
            let group = self.get_or_create(transport, tag, &step.ranks)?;
            if group.is_member() {
                dim_groups.push(group);
            }
        }
        Ok(dim_groups)
    }

    /// Look up a group without creating it.
    pub fn lookup(&self, tag: &str, ranks: &[usize]) -> Option<GroupHandle> {
        self.state
            .lock()
            .groups
            .get(&(tag.to_owned(), ranks.to_vec()))
            .cloned()
    }

    /// Groups under `tag` that this process belongs to, in registration order.
    pub fn member_groups(&self, tag: &str) -> Vec<GroupHandle> {
        self.state
            .lock()
            .order
            .iter()
            .filter(|g| g.tag() == tag && g.is_member())
            .cloned()
            .collect()
    }

    /// Distinct tags seen so far, in first-use order.
    pub fn tags(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut out: Vec<String> = Vec::new();
        for g in &state.order {
            if !out.iter().any(|t| t == g.tag()) {
                out.push(g.tag().to_owned());
            }
        }
        out
    }

    /// Every registered `(id, ranks)` pair, member or not, in registration
    /// order.
    pub fn registrations(&self) -> Vec<(GroupId, Vec<usize>)> {
        self.state
            .lock()
            .order
            .iter()
            .map(|g| (g.id(), g.ranks().to_vec()))
            .collect()
    }

    /// Number of transport-level group creations this process took part in.
    pub fn creations(&self) -> usize {
        self.state.lock().creations
    }

    /// Number of registered rank sets, member or not.
    pub fn len(&self) -> usize {
        self.state.lock().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
