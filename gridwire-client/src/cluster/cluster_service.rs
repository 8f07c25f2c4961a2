//! Holder of the current member table.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use gridwire_core::protocol::messages::cluster_view::ClusterViewEvent;
use gridwire_core::MemberInfo;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use super::member_table::{MemberTable, MembershipDiff};
use crate::listener::MemberEvent;

const MEMBER_EVENT_CAPACITY: usize = 64;

/// Publishes the member table and membership events.
///
/// Readers take lock-free snapshots; updates replace the whole table with a
/// compare-and-swap loop, so concurrent view events never lose each other's
/// changes.
#[derive(Debug)]
pub struct ClusterService {
    table: ArcSwap<MemberTable>,
    member_events: broadcast::Sender<MemberEvent>,
    changes: watch::Sender<u64>,
}

impl Default for ClusterService {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterService {
    /// Creates a service with an empty table.
    pub fn new() -> Self {
        let (member_events, _) = broadcast::channel(MEMBER_EVENT_CAPACITY);
        let (changes, _) = watch::channel(0);
        Self {
            table: ArcSwap::from_pointee(MemberTable::empty()),
            member_events,
            changes,
        }
    }

    /// Returns the current table.
    pub fn snapshot(&self) -> Arc<MemberTable> {
        self.table.load_full()
    }

    /// Returns the current members.
    pub fn members(&self) -> Vec<MemberInfo> {
        self.table.load().members().to_vec()
    }

    /// Looks up a current member.
    pub fn member(&self, uuid: Uuid) -> Option<MemberInfo> {
        self.table.load().member(uuid).cloned()
    }

    /// Subscribes to membership changes.
    pub fn subscribe(&self) -> broadcast::Receiver<MemberEvent> {
        self.member_events.subscribe()
    }

    /// Waits until the table lists at least one member. Returns false if
    /// none arrived within `timeout`.
    pub async fn wait_for_members(&self, timeout: Duration) -> bool {
        let mut changes = self.changes.subscribe();
        let wait = async {
            while self.table.load().members().is_empty() {
                if changes.changed().await.is_err() {
                    return false;
                }
            }
            true
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    /// Applies a view pushed by the cluster. Returns true if the table
    /// changed.
    pub fn apply(&self, event: ClusterViewEvent) -> bool {
        match event {
            ClusterViewEvent::Members { version, members } => self.apply_members_view(version, members),
            ClusterViewEvent::Partitions { version, partitions } => {
                self.apply_partitions_view(version, &partitions)
            }
        }
    }

    /// Applies a member list if its version is newer than the current one.
    pub fn apply_members_view(&self, version: i32, members: Vec<MemberInfo>) -> bool {
        let mut diff = None;
        self.table.rcu(|current| match current.with_members(version, members.clone()) {
            Some((next, changes)) => {
                diff = Some(changes);
                Arc::new(next)
            }
            None => {
                diff = None;
                Arc::clone(current)
            }
        });

        match diff {
            Some(diff) => {
                tracing::info!(
                    version = version,
                    members = members.len(),
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    "member list updated"
                );
                self.notify_changed();
                self.publish(diff);
                true
            }
            None => {
                tracing::debug!(version = version, "ignoring stale member list");
                false
            }
        }
    }

    /// Applies a partition table if its version is newer than the current one.
    pub fn apply_partitions_view(&self, version: i32, partitions: &[(Uuid, Vec<i32>)]) -> bool {
        let mut applied = false;
        self.table.rcu(|current| match current.with_partitions(version, partitions) {
            Some(next) => {
                applied = true;
                Arc::new(next)
            }
            None => {
                applied = false;
                Arc::clone(current)
            }
        });

        if applied {
            tracing::debug!(version = version, owners = partitions.len(), "partition table updated");
            self.notify_changed();
        }
        applied
    }

    pub(crate) fn set_partition_count(&self, partition_count: i32) {
        self.table.rcu(|current| {
            current
                .with_partition_count(partition_count)
                .map(Arc::new)
                .unwrap_or_else(|| Arc::clone(current))
        });
    }

    /// Drops all membership and partition information, reporting every
    /// known member as removed.
    pub(crate) fn reset(&self) {
        let previous = self.table.swap(Arc::new(MemberTable::empty()));
        self.notify_changed();
        self.publish(MembershipDiff {
            added: Vec::new(),
            removed: previous.members().to_vec(),
        });
    }

    fn notify_changed(&self) {
        self.changes.send_replace(self.table.load().version());
    }

    fn publish(&self, diff: MembershipDiff) {
        for member in diff.removed {
            let _ = self.member_events.send(MemberEvent::member_removed(member));
        }
        for member in diff.added {
            let _ = self.member_events.send(MemberEvent::member_added(member));
        }
    }
}
