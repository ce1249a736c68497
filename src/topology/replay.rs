//! Offline replay of group registration as every rank of a world.
//!
//! Each simulated rank drives its own [`GroupRegistry`] through the same
//! registration path a [`MeshContext`](crate::topology::context::MeshContext)
//! uses (world group, explicit groups, then each mesh), over a transport that
//! records the groups it would create and moves no data. [`verify_plans`]
//! then checks that all ranks handed out the same ids for the same rank sets
//! and that each rank kept exactly the groups that contain it.

use crate::algs::transport::{Combine, Transport};
use crate::mesh_error::MeshError;
use crate::topology::group::{GroupHandle, GroupId};
use crate::topology::group_registry::GroupRegistry;
use crate::topology::layout::MeshLayout;
use parking_lot::Mutex;

/// Transport that records group creations. Data collectives fail.
struct RecordingTransport {
    rank: usize,
    world_size: usize,
    created: Mutex<Vec<GroupId>>,
}

impl RecordingTransport {
    fn new(rank: usize, world_size: usize) -> Self {
        Self {
            rank,
            world_size,
            created: Mutex::new(Vec::new()),
        }
    }

    fn no_data(&self, op: &str) -> Result<(), MeshError> {
        Err(MeshError::comm(
            self.rank,
            format!("{op} moves no data during a registration replay"),
        ))
    }
}

impl Transport for RecordingTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn create_group(&self, group: &GroupHandle) -> Result<(), MeshError> {
        self.created.lock().push(group.id());
        Ok(())
    }

    fn broadcast(&self, _: &GroupHandle, _: &mut [u8], _: usize) -> Result<(), MeshError> {
        self.no_data("broadcast")
    }

    fn scatter(
        &self,
        _: &GroupHandle,
        _: &mut [u8],
        _: Option<&[&[u8]]>,
        _: usize,
    ) -> Result<(), MeshError> {
        self.no_data("scatter")
    }

    fn all_to_all(
        &self,
        _: &GroupHandle,
        _: &mut [&mut [u8]],
        _: &[&[u8]],
    ) -> Result<(), MeshError> {
        self.no_data("all_to_all")
    }

    fn all_gather(&self, _: &GroupHandle, _: &mut [u8], _: &[u8]) -> Result<(), MeshError> {
        self.no_data("all_gather")
    }

    fn reduce(
        &self,
        _: &GroupHandle,
        _: &mut [u8],
        _: usize,
        _: Combine<'_>,
    ) -> Result<(), MeshError> {
        self.no_data("reduce")
    }
}

/// What one rank registered during a replay.
#[derive(Clone, Debug)]
pub struct RankPlan {
    pub rank: usize,
    /// Every `(id, ranks)` registration, member or not, in order.
    pub registrations: Vec<(GroupId, Vec<usize>)>,
    /// Groups this rank took part in creating, in order.
    pub created: Vec<GroupId>,
    /// Per mesh layout, the groups this rank kept (one per dimension, or
    /// none when it is outside the layout).
    pub mesh_groups: Vec<Vec<GroupHandle>>,
}

fn replay_rank(
    rank: usize,
    world_size: usize,
    tag: &str,
    explicit: &[Vec<usize>],
    layouts: &[MeshLayout],
) -> Result<RankPlan, MeshError> {
    let transport = RecordingTransport::new(rank, world_size);
    let registry = GroupRegistry::new();
    let everyone: Vec<usize> = (0..world_size).collect();
    registry.get_or_create(&transport, tag, &everyone)?;
    for ranks in explicit {
        MeshLayout::from_ranks(ranks.clone())?.check_world(world_size)?;
        registry.get_or_create(&transport, tag, ranks)?;
    }
    let mesh_groups = layouts
        .iter()
        .map(|layout| {
            layout.check_world(world_size)?;
            registry.resolve_mesh_groups(&transport, tag, layout)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RankPlan {
        rank,
        registrations: registry.registrations(),
        created: transport.created.into_inner(),
        mesh_groups,
    })
}

/// Replay, as every rank of a `world_size` world, bootstrap under `tag`,
/// then one explicit group per entry of `explicit`, then one mesh per entry
/// of `layouts`. Plans come back in rank order.
pub fn simulate_plans(
    world_size: usize,
    tag: &str,
    explicit: &[Vec<usize>],
    layouts: &[MeshLayout],
) -> Result<Vec<RankPlan>, MeshError> {
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        (0..world_size)
            .into_par_iter()
            .map(|rank| replay_rank(rank, world_size, tag, explicit, layouts))
            .collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        (0..world_size)
            .map(|rank| replay_rank(rank, world_size, tag, explicit, layouts))
            .collect()
    }
}

fn mismatch(group: GroupId, detail: String) -> MeshError {
    MeshError::GroupMismatch {
        group: group.0,
        detail,
    }
}

/// Check replayed plans: identical registrations on every rank, and for each
/// layout each rank holds exactly the subsets through its own coordinate.
pub fn verify_plans(plans: &[RankPlan], layouts: &[MeshLayout]) -> Result<(), MeshError> {
    let Some(reference) = plans.first() else {
        return Ok(());
    };
    for plan in plans {
        let diverged = plan
            .registrations
            .iter()
            .zip(&reference.registrations)
            .position(|(a, b)| a != b);
        if let Some(i) = diverged {
            let (id, ranks) = &plan.registrations[i];
            return Err(mismatch(
                *id,
                format!(
                    "rank {} registered {ranks:?} where rank {} registered {:?}",
                    plan.rank, reference.rank, reference.registrations[i].1
                ),
            ));
        }
        if plan.registrations.len() != reference.registrations.len() {
            return Err(mismatch(
                GroupId(plan.registrations.len() as u64),
                format!(
                    "rank {} registered {} groups, rank {} registered {}",
                    plan.rank,
                    plan.registrations.len(),
                    reference.rank,
                    reference.registrations.len()
                ),
            ));
        }
        for (layout, groups) in layouts.iter().zip(&plan.mesh_groups) {
            let expected = match layout.coordinate_of(plan.rank) {
                Some(coord) => (0..layout.ndim())
                    .map(|d| layout.subset_containing(d, &coord))
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };
            let held: Vec<&[usize]> = groups.iter().map(GroupHandle::ranks).collect();
            if held != expected {
                let id = groups.first().map_or(GroupId(0), GroupHandle::id);
                return Err(mismatch(
                    id,
                    format!(
                        "rank {} holds {held:?} for layout {:?}, expected {expected:?}",
                        plan.rank,
                        layout.ranks()
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_by_two_world_agrees() {
        let l = MeshLayout::from_shape(&[2, 2]).unwrap();
        let plans = simulate_plans(4, "", &[], std::slice::from_ref(&l)).unwrap();
        assert_eq!(plans.len(), 4);
        verify_plans(&plans, &[l]).unwrap();
        // world + 2 subsets per dimension
        assert_eq!(plans[0].registrations.len(), 5);
        for plan in &plans {
            assert_eq!(plan.created.len(), 3, "rank {}", plan.rank);
        }
    }

    #[test]
    fn data_collectives_are_refused() {
        let t = RecordingTransport::new(0, 1);
        let g = GroupHandle::new(GroupId(0), "", vec![0], 0);
        assert!(matches!(
            t.broadcast(&g, &mut [0u8; 1], 0),
            Err(MeshError::CommError { .. })
        ));
    }
}
