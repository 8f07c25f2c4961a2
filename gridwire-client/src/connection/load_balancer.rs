//! Member selection for invocations without a partition or member target.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gridwire_core::MemberInfo;
use rand::Rng;

/// A strategy for picking the member an untargeted invocation goes to.
pub trait LoadBalancer: Send + Sync {
    /// Selects a member from `members`, or `None` if the slice is empty.
    fn select<'a>(&self, members: &'a [MemberInfo]) -> Option<&'a MemberInfo>;
}

impl std::fmt::Debug for dyn LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LoadBalancer")
    }
}

/// Cycles through members in order.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    index: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    /// Creates a new round-robin load balancer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn select<'a>(&self, members: &'a [MemberInfo]) -> Option<&'a MemberInfo> {
        if members.is_empty() {
            return None;
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % members.len();
        members.get(idx)
    }
}

/// Picks a uniformly random member.
#[derive(Debug, Default)]
pub struct RandomLoadBalancer;

impl RandomLoadBalancer {
    /// Creates a new random load balancer.
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn select<'a>(&self, members: &'a [MemberInfo]) -> Option<&'a MemberInfo> {
        if members.is_empty() {
            return None;
        }
        members.get(rand::thread_rng().gen_range(0..members.len()))
    }
}

/// Creates the default load balancer (round-robin).
pub fn default_load_balancer() -> Arc<dyn LoadBalancer> {
    Arc::new(RoundRobinLoadBalancer::new())
}
