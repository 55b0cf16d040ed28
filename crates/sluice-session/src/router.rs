//! # Message router
//!
//! Every inbound text frame passes through [`MessageRouter::route`], one at a
//! time, on the connection's reader task:
//!
//! 1. Decode with the frame codec. Malformed frames are logged and dropped.
//! 2. Deliver the message to every global subscriber for its `type`, in
//!    subscription order.
//! 3. If the `streamId` is registered, deliver the typed event to that
//!    stream's sink. Kinds the sink does not handle are ignored.
//! 4. Remove the stream after a `complete` or `error`, whatever happened in
//!    step 3.
//!
//! Routing never waits on a consumer. A channel sink that is full is
//! dropped on the spot, so its stream ends as abandoned while every other
//! stream on the link keeps flowing.
//!
//! Nothing here returns an error: a bad frame never reaches the connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use sluice_core::frame::{self, InboundMessage, MessageKind};
use tracing::{debug, trace, warn};

use crate::registry::{Delivery, StreamRegistry};

type SubscriberFn = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

struct Subscriber {
    id: u64,
    kind: MessageKind,
    handler: SubscriberFn,
}

type Subscribers = RwLock<Vec<Subscriber>>;

/// Dispatches decoded frames to global subscribers and stream sinks.
pub struct MessageRouter {
    registry: StreamRegistry,
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
}

impl MessageRouter {
    /// Router over `registry`.
    #[must_use]
    pub fn new(registry: StreamRegistry) -> Self {
        Self {
            registry,
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// The registry this router looks streams up in.
    #[must_use]
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Call `handler` for every message of `kind`, on any stream or none.
    ///
    /// The subscription lasts until the returned guard is dropped.
    pub fn subscribe(
        &self,
        kind: MessageKind,
        handler: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push(Subscriber {
            id,
            kind,
            handler: Arc::new(handler),
        });
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Number of live global subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Route one inbound text frame.
    pub fn route(&self, text: &str) {
        let message = match frame::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed frame");
                return;
            }
        };
        let Some(kind) = message.kind.clone() else {
            trace!("frame without type ignored");
            return;
        };

        // Snapshot so a handler may subscribe or unsubscribe without deadlocking.
        let handlers: Vec<SubscriberFn> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.handler.clone())
            .collect();
        for handler in handlers {
            handler(&message);
        }

        let Some(stream_id) = message.stream_id.as_ref() else {
            return;
        };
        let Some(sink) = self.registry.lookup(stream_id) else {
            debug!(%stream_id, %kind, "frame for unknown stream dropped");
            return;
        };

        trace!(%stream_id, %kind, "routing frame");
        match message.to_event() {
            Some(Ok(event)) => {
                if matches!(kind, MessageKind::Metadata | MessageKind::Data) {
                    self.registry.mark_first_event(stream_id);
                }
                if sink.deliver(event) == Delivery::Full && self.registry.remove(stream_id) {
                    warn!(%stream_id, %kind, "stream consumer fell behind, dropping stream");
                    return;
                }
            }
            Some(Err(e)) => warn!(%stream_id, error = %e, "dropping frame with invalid payload"),
            None => {}
        }

        if kind.is_terminal() && self.registry.remove(stream_id) {
            debug!(%stream_id, %kind, "stream finished");
        }
    }

    /// Drop every open stream without notifying it. Returns how many were open.
    pub fn abandon_all(&self) -> usize {
        let dropped = self.registry.clear();
        if dropped > 0 {
            debug!(dropped, "abandoned open streams");
        }
        dropped
    }
}

/// Guard for one global subscription; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    /// Unsubscribe now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.write().retain(|s| s.id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
