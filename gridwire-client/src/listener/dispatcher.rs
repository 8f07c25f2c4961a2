//! Striped event executor.
//!
//! Event messages leave the connection read loop through [`EventDispatcher::dispatch`],
//! which never blocks: the event is queued on one of a fixed number of
//! worker stripes and the handler runs there. The stripe is picked from the
//! event's partition id, or from the registration's correlation id for
//! events without a partition, so events of one partition (or one
//! registration) are handled in arrival order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gridwire_core::ClientMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EventConfig;

/// Callback receiving the raw event messages of one registration.
pub type EventHandler = Arc<dyn Fn(ClientMessage) + Send + Sync>;

type Task = (EventHandler, ClientMessage);

/// Routes event messages to registered handlers on striped worker tasks.
pub struct EventDispatcher {
    handlers: DashMap<i64, EventHandler>,
    stripes: Vec<mpsc::Sender<Task>>,
    shutdown: CancellationToken,
    dropped: AtomicU64,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .field("stripes", &self.stripes.len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventDispatcher {
    /// Creates the dispatcher and spawns its worker stripes on the current
    /// runtime.
    pub fn new(config: &EventConfig) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let stripes = (0..config.worker_count())
            .map(|index| {
                let (tx, rx) = mpsc::channel(config.queue_capacity());
                tokio::spawn(run_stripe(index, rx, shutdown.clone()));
                tx
            })
            .collect();

        Arc::new(Self {
            handlers: DashMap::new(),
            stripes,
            shutdown,
            dropped: AtomicU64::new(0),
        })
    }

    /// Routes events carrying `correlation_id` to `handler`.
    pub fn register(&self, correlation_id: i64, handler: EventHandler) {
        self.handlers.insert(correlation_id, handler);
    }

    /// Stops routing events for `correlation_id`.
    pub fn deregister(&self, correlation_id: i64) -> bool {
        self.handlers.remove(&correlation_id).is_some()
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Returns how many events were dropped because their stripe was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queues `message` for its handler without waiting.
    pub fn dispatch(&self, message: ClientMessage) {
        let Some(correlation_id) = message.correlation_id() else {
            tracing::warn!("dropping event without a header");
            return;
        };

        let handler = match self.handlers.get(&correlation_id) {
            Some(handler) => Arc::clone(handler.value()),
            None => {
                tracing::debug!(
                    correlation_id = correlation_id,
                    message_type = ?message.message_type(),
                    "no handler for event"
                );
                return;
            }
        };

        if self.stripes.is_empty() || self.shutdown.is_cancelled() {
            return;
        }

        let partition_id = message.partition_id().unwrap_or(-1);
        let stripe = stripe_index(partition_id, correlation_id, self.stripes.len());
        match self.stripes[stripe].try_send((handler, message)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    stripe = stripe,
                    correlation_id = correlation_id,
                    "event queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(stripe = stripe, "event stripe stopped");
            }
        }
    }

    /// Stops the worker stripes. Queued events are discarded.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.handlers.clear();
    }
}

fn stripe_index(partition_id: i32, correlation_id: i64, stripes: usize) -> usize {
    if partition_id >= 0 {
        partition_id as usize % stripes
    } else {
        correlation_id.rem_euclid(stripes as i64) as usize
    }
}

async fn run_stripe(index: usize, mut rx: mpsc::Receiver<Task>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some((handler, message)) => run_handler(index, &handler, message),
                None => break,
            },
        }
    }
    tracing::trace!(stripe = index, "event stripe stopped");
}

fn run_handler(index: usize, handler: &EventHandler, message: ClientMessage) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(message))) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(stripe = index, panic = %reason, "event handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventConfigBuilder;
    use gridwire_core::protocol::{event_initial_frame, CLIENT_DISTRIBUTED_OBJECT_EVENT};
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    fn event(correlation_id: i64, partition_id: i32, seq: i32) -> ClientMessage {
        let mut msg = ClientMessage::from_initial_frame(event_initial_frame(
            CLIENT_DISTRIBUTED_OBJECT_EVENT,
            partition_id,
            0,
        ));
        msg.set_correlation_id(correlation_id);
        msg.add_frame(gridwire_core::Frame::from_slice(&seq.to_le_bytes()));
        msg
    }

    fn seq_of(msg: &ClientMessage) -> i32 {
        let content = &msg.frames()[1].content;
        i32::from_le_bytes([content[0], content[1], content[2], content[3]])
    }

    #[test]
    fn test_stripe_index() {
        assert_eq!(stripe_index(7, 100, 4), 3);
        assert_eq!(stripe_index(-1, 6, 4), 2);
        assert_eq!(stripe_index(-1, -3, 4), 1);
    }

    #[tokio::test]
    async fn test_events_of_one_registration_arrive_in_order() {
        let config = EventConfigBuilder::new().worker_count(3).build().unwrap();
        let dispatcher = EventDispatcher::new(&config);
        let (tx, mut rx) = unbounded_channel();
        dispatcher.register(
            42,
            Arc::new(move |msg: ClientMessage| {
                let _ = tx.send(seq_of(&msg));
            }),
        );

        for seq in 0..50 {
            dispatcher.dispatch(event(42, -1, seq));
        }

        let mut seen = Vec::new();
        while seen.len() < 50 {
            seen.push(tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap());
        }
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_unregistered_events_are_ignored() {
        let dispatcher = EventDispatcher::new(&EventConfig::default());
        dispatcher.dispatch(event(9, -1, 0));
        assert_eq!(dispatcher.handler_count(), 0);
        assert!(!dispatcher.deregister(9));
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_stop_stripe() {
        let config = EventConfigBuilder::new().worker_count(1).build().unwrap();
        let dispatcher = EventDispatcher::new(&config);
        let (tx, mut rx) = unbounded_channel();
        dispatcher.register(
            1,
            Arc::new(move |msg: ClientMessage| {
                if seq_of(&msg) == 0 {
                    panic!("handler failure");
                }
                let _ = tx.send(seq_of(&msg));
            }),
        );

        dispatcher.dispatch(event(1, -1, 0));
        dispatcher.dispatch(event(1, -1, 1));

        let seq = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(seq, Some(1));
    }

    #[tokio::test]
    async fn test_full_stripe_drops_event() {
        let config = EventConfigBuilder::new()
            .worker_count(1)
            .queue_capacity(1)
            .build()
            .unwrap();
        let dispatcher = EventDispatcher::new(&config);
        dispatcher.register(5, Arc::new(|_msg: ClientMessage| {}));

        // The current-thread runtime only runs the stripe when this task
        // yields, so the first event fills the queue.
        for seq in 0..3 {
            dispatcher.dispatch(event(5, 0, seq));
        }
        assert_eq!(dispatcher.dropped_events(), 2);
    }
}
