//! `GroupHandle`: a resolved communication group over an ordered rank set.
//!
//! A handle remembers the original rank ordering so that a global rank can be
//! mapped to its local position inside the group and back. Handles are cheap
//! to clone; two handles are equal when they name the same registry entry.

use crate::algs::wire::rank_fingerprint;
use std::fmt;
use std::sync::Arc;

/// Registry-assigned group identifier. Identical on every rank because every
/// rank registers groups in the same order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

struct GroupInfo {
    id: GroupId,
    tag: String,
    ranks: Vec<usize>,
    local_rank: Option<usize>,
}

/// Handle to a communication group. Non-members also hold handles (so that
/// registries stay in lock-step across ranks) but cannot run collectives.
#[derive(Clone)]
pub struct GroupHandle(Arc<GroupInfo>);

impl GroupHandle {
    pub(crate) fn new(id: GroupId, tag: &str, ranks: Vec<usize>, my_rank: usize) -> Self {
        let local_rank = ranks.iter().position(|&r| r == my_rank);
        Self(Arc::new(GroupInfo {
            id,
            tag: tag.to_owned(),
            ranks,
            local_rank,
        }))
    }

    pub fn id(&self) -> GroupId {
        self.0.id
    }

    /// Namespace the group was registered under.
    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    /// Member ranks in group order.
    pub fn ranks(&self) -> &[usize] {
        &self.0.ranks
    }

    pub fn size(&self) -> usize {
        self.0.ranks.len()
    }

    /// This process's position inside the group, if it is a member.
    pub fn local_rank(&self) -> Option<usize> {
        self.0.local_rank
    }

    pub fn is_member(&self) -> bool {
        self.0.local_rank.is_some()
    }

    /// Global rank of the member at `local` position.
    pub fn global_rank_at(&self, local: usize) -> Option<usize> {
        self.0.ranks.get(local).copied()
    }

    /// Local position of a global rank.
    pub fn local_rank_of(&self, global: usize) -> Option<usize> {
        self.0.ranks.iter().position(|&r| r == global)
    }

    pub fn fingerprint(&self) -> u64 {
        rank_fingerprint(&self.0.ranks)
    }
}

impl PartialEq for GroupHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id && self.0.tag == other.0.tag
    }
}

impl Eq for GroupHandle {}

impl fmt::Debug for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("id", &self.0.id)
            .field("tag", &self.0.tag)
            .field("ranks", &self.0.ranks)
            .field("local_rank", &self.0.local_rank)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_mapping_round_trips() {
        let g = GroupHandle::new(GroupId(3), "", vec![4, 0, 6], 6);
        assert_eq!(g.local_rank(), Some(2));
        assert_eq!(g.global_rank_at(1), Some(0));
        assert_eq!(g.local_rank_of(4), Some(0));
        assert_eq!(g.global_rank_at(3), None);
    }

    #[test]
    fn non_member_has_no_local_rank() {
        let g = GroupHandle::new(GroupId(0), "", vec![1, 3], 2);
        assert!(!g.is_member());
        assert_eq!(g.size(), 2);
    }
}
