//! Event listeners and subscription management.

mod dispatcher;
mod distributed_object;
mod lifecycle;
mod membership;
mod service;

pub use dispatcher::{EventDispatcher, EventHandler};
pub use distributed_object::{DistributedObjectListenerCodec, DISTRIBUTED_OBJECT_LISTENER_KEY};
pub use lifecycle::{LifecycleEvent, LifecycleListener};
pub use membership::{MemberEvent, MemberEventType, MembershipListener};
pub use service::{ListenerCodec, ListenerService, SubscriptionId};

pub(crate) use distributed_object::event_handler as distributed_object_handler;
pub(crate) use lifecycle::notify as notify_lifecycle;
pub(crate) use membership::notify as notify_membership;
