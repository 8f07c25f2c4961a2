//! Cluster membership events.

use gridwire_core::MemberInfo;

/// Type of membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberEventType {
    /// A new member joined the cluster.
    Added,
    /// A member left the cluster.
    Removed,
}

impl std::fmt::Display for MemberEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "ADDED"),
            Self::Removed => write!(f, "REMOVED"),
        }
    }
}

/// An event fired when a cluster member joins or leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEvent {
    /// The member that triggered the event.
    pub member: MemberInfo,
    /// The type of membership change.
    pub event_type: MemberEventType,
}

impl MemberEvent {
    /// Creates an event for a member that joined the cluster.
    pub fn member_added(member: MemberInfo) -> Self {
        Self {
            member,
            event_type: MemberEventType::Added,
        }
    }

    /// Creates an event for a member that left the cluster.
    pub fn member_removed(member: MemberInfo) -> Self {
        Self {
            member,
            event_type: MemberEventType::Removed,
        }
    }
}

impl std::fmt::Display for MemberEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemberEvent[{} {}]", self.member, self.event_type)
    }
}

/// Receives membership changes.
pub trait MembershipListener: Send + Sync {
    /// Called when a new member joins the cluster.
    fn member_added(&self, event: &MemberEvent);

    /// Called when a member leaves the cluster.
    fn member_removed(&self, event: &MemberEvent);
}

impl std::fmt::Debug for dyn MembershipListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MembershipListener")
    }
}

pub(crate) fn notify(listener: &dyn MembershipListener, event: &MemberEvent) {
    match event.event_type {
        MemberEventType::Added => listener.member_added(event),
        MemberEventType::Removed => listener.member_removed(event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwire_core::Address;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct Counting {
        added: AtomicU32,
        removed: AtomicU32,
    }

    impl MembershipListener for Counting {
        fn member_added(&self, _event: &MemberEvent) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }

        fn member_removed(&self, _event: &MemberEvent) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_notify_routes_by_event_type() {
        let member = MemberInfo::new(Uuid::new_v4(), Address::new("127.0.0.1", 5701));
        let listener = Counting::default();

        notify(&listener, &MemberEvent::member_added(member.clone()));
        notify(&listener, &MemberEvent::member_removed(member.clone()));
        notify(&listener, &MemberEvent::member_removed(member));

        assert_eq!(listener.added.load(Ordering::SeqCst), 1);
        assert_eq!(listener.removed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_member_event_display() {
        let member = MemberInfo::new(Uuid::nil(), Address::new("10.0.0.1", 5701));
        let event = MemberEvent::member_added(member);
        assert_eq!(
            event.to_string(),
            format!("MemberEvent[Member[uuid={}, address=10.0.0.1:5701] ADDED]", Uuid::nil())
        );
    }
}
