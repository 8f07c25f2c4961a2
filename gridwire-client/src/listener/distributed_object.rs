//! Distributed object lifecycle listener.

use std::sync::Arc;

use gridwire_core::protocol::messages::distributed_object::{self, DistributedObjectEvent};
use gridwire_core::{ClientMessage, Result};
use uuid::Uuid;

use super::{EventHandler, ListenerCodec};

/// Key under which all distributed object listeners share one registration.
pub const DISTRIBUTED_OBJECT_LISTENER_KEY: &str = "distributed-object";

/// Add and remove requests for distributed object created/destroyed events.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistributedObjectListenerCodec;

impl ListenerCodec for DistributedObjectListenerCodec {
    fn encode_add_request(&self, local_only: bool) -> ClientMessage {
        distributed_object::encode_add_request(local_only)
    }

    fn decode_add_response(&self, response: &ClientMessage) -> Result<Uuid> {
        distributed_object::decode_add_response(response)
    }

    fn encode_remove_request(&self, registration_id: Uuid) -> ClientMessage {
        distributed_object::encode_remove_request(registration_id)
    }

    fn decode_remove_response(&self, response: &ClientMessage) -> Result<bool> {
        distributed_object::decode_remove_response(response)
    }
}

/// Wraps a typed callback into a raw event handler. Undecodable events are
/// logged and skipped.
pub(crate) fn event_handler<F>(listener: F) -> EventHandler
where
    F: Fn(DistributedObjectEvent) + Send + Sync + 'static,
{
    Arc::new(move |message: ClientMessage| match distributed_object::decode_event(&message) {
        Ok(event) => listener(event),
        Err(e) => tracing::warn!(error = %e, "failed to decode distributed object event"),
    })
}
