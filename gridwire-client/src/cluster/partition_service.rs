//! Partition service for querying partition ownership and key routing.

use std::sync::Arc;

use gridwire_core::{partition_id_for_key, MemberInfo, PartitionAware};
use uuid::Uuid;

use super::ClusterService;

/// Represents a single partition in the cluster.
#[derive(Debug, Clone)]
pub struct Partition {
    id: i32,
    owner_uuid: Option<Uuid>,
}

impl Partition {
    /// Creates a new partition with the given ID and optional owner.
    pub fn new(id: i32, owner_uuid: Option<Uuid>) -> Self {
        Self { id, owner_uuid }
    }

    /// Returns the partition ID.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the UUID of the partition owner, if known.
    pub fn owner_uuid(&self) -> Option<Uuid> {
        self.owner_uuid
    }
}

impl PartialEq for Partition {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Partition {}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.owner_uuid {
            Some(uuid) => write!(f, "Partition[id={}, owner={}]", self.id, uuid),
            None => write!(f, "Partition[id={}, owner=unknown]", self.id),
        }
    }
}

/// Answers partition questions from the current member table snapshot.
#[derive(Debug, Clone)]
pub struct PartitionService {
    cluster: Arc<ClusterService>,
}

impl PartitionService {
    pub(crate) fn new(cluster: Arc<ClusterService>) -> Self {
        Self { cluster }
    }

    /// Returns the number of partitions, or 0 before the first member
    /// accepted the client.
    pub fn partition_count(&self) -> i32 {
        self.cluster.snapshot().partition_count()
    }

    /// Returns every partition with its owner, if known.
    pub fn partitions(&self) -> Vec<Partition> {
        let table = self.cluster.snapshot();
        (0..table.partition_count())
            .map(|id| Partition::new(id, table.partition_owner(id)))
            .collect()
    }

    /// Maps serialized key bytes to a partition id.
    ///
    /// Returns `None` while the partition count is unknown.
    pub fn partition_id_for_key(&self, key: &[u8]) -> Option<i32> {
        partition_id_for_key(key, self.partition_count())
    }

    /// Maps a partition-aware key to a partition id using its partition key.
    pub fn partition_id_for<K: PartitionAware + ?Sized>(&self, key: &K) -> Option<i32> {
        self.partition_id_for_key(&key.partition_key_bytes())
    }

    /// Returns the partition that `key` belongs to.
    pub fn partition_for_key(&self, key: &[u8]) -> Option<Partition> {
        let table = self.cluster.snapshot();
        let id = partition_id_for_key(key, table.partition_count())?;
        Some(Partition::new(id, table.partition_owner(id)))
    }

    /// Returns the member that owns `partition_id`, if known and still in the
    /// cluster.
    pub fn partition_owner(&self, partition_id: i32) -> Option<MemberInfo> {
        let table = self.cluster.snapshot();
        let owner = table.partition_owner(partition_id)?;
        table.member(owner).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwire_core::Address;

    struct SessionKey {
        session: String,
    }

    impl PartitionAware for SessionKey {
        fn partition_key_bytes(&self) -> Vec<u8> {
            self.session.as_bytes().to_vec()
        }
    }

    fn populated() -> (PartitionService, MemberInfo) {
        let cluster = Arc::new(ClusterService::new());
        let owner = MemberInfo::new(Uuid::new_v4(), Address::new("127.0.0.1", 5701));
        cluster.set_partition_count(4);
        cluster.apply_members_view(1, vec![owner.clone()]);
        cluster.apply_partitions_view(1, &[(owner.uuid(), vec![0, 1, 2, 3])]);
        (PartitionService::new(cluster), owner)
    }

    #[test]
    fn test_unknown_partition_count() {
        let service = PartitionService::new(Arc::new(ClusterService::new()));
        assert_eq!(service.partition_count(), 0);
        assert!(service.partitions().is_empty());
        assert_eq!(service.partition_id_for_key(b"key"), None);
    }

    #[test]
    fn test_partitions_and_owner() {
        let (service, owner) = populated();
        let partitions = service.partitions();
        assert_eq!(partitions.len(), 4);
        assert!(partitions.iter().all(|p| p.owner_uuid() == Some(owner.uuid())));
        assert_eq!(service.partition_owner(2), Some(owner));
        assert_eq!(service.partition_owner(9), None);
    }

    #[test]
    fn test_partition_aware_key_routes_by_partition_key() {
        let (service, _) = populated();
        let key = SessionKey {
            session: "session-7".to_string(),
        };
        assert_eq!(service.partition_id_for(&key), service.partition_id_for_key(b"session-7"));
        let partition = service.partition_for_key(b"session-7").unwrap();
        assert!((0..4).contains(&partition.id()));
    }

    #[test]
    fn test_partition_display() {
        assert_eq!(Partition::new(3, None).to_string(), "Partition[id=3, owner=unknown]");
    }
}
