//! Cluster membership and partition ownership.

mod cluster_service;
mod member_table;
mod partition_service;
mod view_listener;

pub use cluster_service::ClusterService;
pub use member_table::{MemberTable, MembershipDiff};
pub use partition_service::{Partition, PartitionService};

pub(crate) use view_listener::ClusterViewListener;
