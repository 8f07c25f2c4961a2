//! Immutable snapshot of cluster membership and partition ownership.

use std::collections::HashSet;

use gridwire_core::MemberInfo;
use tracing::warn;
use uuid::Uuid;

/// Upper bound on a partition count inferred from a partition view alone.
const MAX_INFERRED_PARTITION_COUNT: i32 = 1 << 16;

/// Membership and partition ownership as last pushed by the cluster.
///
/// A table is never mutated once published. Every update builds a new table
/// with a higher [`version`](MemberTable::version), which the cluster service
/// swaps in atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberTable {
    version: u64,
    member_list_version: i32,
    partition_state_version: i32,
    members: Vec<MemberInfo>,
    partition_owners: Vec<Option<Uuid>>,
    partition_count: i32,
}

/// Membership changes between two tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    /// Members present only in the new table.
    pub added: Vec<MemberInfo>,
    /// Members present only in the old table.
    pub removed: Vec<MemberInfo>,
}

impl MembershipDiff {
    /// Returns true if membership did not change.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl Default for MemberTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl MemberTable {
    /// A table with no members and no partition information.
    pub fn empty() -> Self {
        Self {
            version: 0,
            member_list_version: -1,
            partition_state_version: -1,
            members: Vec::new(),
            partition_owners: Vec::new(),
            partition_count: 0,
        }
    }

    /// Local version, bumped on every published change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version of the member list reported by the cluster.
    pub fn member_list_version(&self) -> i32 {
        self.member_list_version
    }

    /// Version of the partition table reported by the cluster.
    pub fn partition_state_version(&self) -> i32 {
        self.partition_state_version
    }

    /// Current members in cluster order.
    pub fn members(&self) -> &[MemberInfo] {
        &self.members
    }

    /// Looks up a member by uuid.
    pub fn member(&self, uuid: Uuid) -> Option<&MemberInfo> {
        self.members.iter().find(|m| m.uuid == uuid)
    }

    /// Returns true if `uuid` is a current member.
    pub fn contains(&self, uuid: Uuid) -> bool {
        self.member(uuid).is_some()
    }

    /// Number of partitions, or 0 while unknown.
    pub fn partition_count(&self) -> i32 {
        self.partition_count
    }

    /// Owner of `partition_id`, if known.
    pub fn partition_owner(&self, partition_id: i32) -> Option<Uuid> {
        usize::try_from(partition_id)
            .ok()
            .and_then(|index| self.partition_owners.get(index).copied().flatten())
    }

    /// Partitions currently owned by `uuid`.
    pub fn partitions_owned_by(&self, uuid: Uuid) -> Vec<i32> {
        self.partition_owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| **owner == Some(uuid))
            .map(|(id, _)| id as i32)
            .collect()
    }

    /// Returns a table with the partition count set, or `None` if it was
    /// already known.
    pub(crate) fn with_partition_count(&self, partition_count: i32) -> Option<Self> {
        if self.partition_count > 0 || partition_count <= 0 {
            return None;
        }
        let mut next = self.clone();
        next.version += 1;
        next.partition_count = partition_count;
        next.partition_owners.resize(partition_count as usize, None);
        Some(next)
    }

    /// Applies a member list, returning the new table and the membership
    /// diff, or `None` if `member_list_version` is not newer.
    pub fn with_members(
        &self,
        member_list_version: i32,
        members: Vec<MemberInfo>,
    ) -> Option<(Self, MembershipDiff)> {
        if member_list_version <= self.member_list_version {
            return None;
        }

        let old: HashSet<Uuid> = self.members.iter().map(|m| m.uuid).collect();
        let new: HashSet<Uuid> = members.iter().map(|m| m.uuid).collect();
        let diff = MembershipDiff {
            added: members.iter().filter(|m| !old.contains(&m.uuid)).cloned().collect(),
            removed: self
                .members
                .iter()
                .filter(|m| !new.contains(&m.uuid))
                .cloned()
                .collect(),
        };

        let mut next = self.clone();
        next.version += 1;
        next.member_list_version = member_list_version;
        next.members = members;
        Some((next, diff))
    }

    /// Applies a partition table given as owner to owned partitions, or
    /// returns `None` if `partition_state_version` is not newer.
    pub fn with_partitions(
        &self,
        partition_state_version: i32,
        partitions: &[(Uuid, Vec<i32>)],
    ) -> Option<Self> {
        if partition_state_version <= self.partition_state_version {
            return None;
        }

        let count = if self.partition_count > 0 {
            self.partition_count
        } else {
            partitions
                .iter()
                .flat_map(|(_, ids)| ids.iter().copied())
                .filter(|id| (0..MAX_INFERRED_PARTITION_COUNT).contains(id))
                .max()
                .map_or(0, |id| id + 1)
        };

        let mut owners = vec![None; count as usize];
        for (owner, ids) in partitions {
            for &id in ids {
                match usize::try_from(id).ok().and_then(|i| owners.get_mut(i)) {
                    Some(slot) => *slot = Some(*owner),
                    None => warn!(
                        partition_id = id,
                        partition_count = count,
                        "ignoring partition outside the partition table"
                    ),
                }
            }
        }

        let mut next = self.clone();
        next.version += 1;
        next.partition_state_version = partition_state_version;
        next.partition_owners = owners;
        next.partition_count = count;
        Some(next)
    }
}
