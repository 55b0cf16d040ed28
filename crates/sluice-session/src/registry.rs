//! Stream registry: stream ID → the sink that receives its events.
//!
//! Entries are held in a sharded [`DashMap`] shared between query issuance
//! and the reader task. Every registration carries a unique token so a stale
//! [`StreamRegistration`] never removes a later registration under the same ID.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde_json::Value;
use sluice_core::{Completion, Metadata, StreamEvent, StreamId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, trace};

// ── Handlers ────────────────────────────────────────────────────────────────

/// Per-kind callbacks for one stream. Unimplemented kinds are ignored.
pub trait StreamHandler: Send + Sync {
    /// Column schema arrived.
    fn on_metadata(&self, _metadata: &Metadata) {}
    /// One row arrived.
    fn on_row(&self, _row: &[Value]) {}
    /// Query finished.
    fn on_complete(&self, _completion: &Completion) {}
    /// Query failed.
    fn on_error(&self, _message: &str) {}
}

/// Closure-backed [`StreamHandler`].
#[derive(Default)]
pub struct Handlers {
    metadata: Option<Box<dyn Fn(&Metadata) + Send + Sync>>,
    row: Option<Box<dyn Fn(&[Value]) + Send + Sync>>,
    complete: Option<Box<dyn Fn(&Completion) + Send + Sync>>,
    error: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl Handlers {
    /// Empty handler set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the metadata callback.
    #[must_use]
    pub fn on_metadata(mut self, f: impl Fn(&Metadata) + Send + Sync + 'static) -> Self {
        self.metadata = Some(Box::new(f));
        self
    }

    /// Set the row callback.
    #[must_use]
    pub fn on_row(mut self, f: impl Fn(&[Value]) + Send + Sync + 'static) -> Self {
        self.row = Some(Box::new(f));
        self
    }

    /// Set the completion callback.
    #[must_use]
    pub fn on_complete(mut self, f: impl Fn(&Completion) + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    /// Set the error callback.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }
}

impl StreamHandler for Handlers {
    fn on_metadata(&self, metadata: &Metadata) {
        if let Some(f) = &self.metadata {
            f(metadata);
        }
    }

    fn on_row(&self, row: &[Value]) {
        if let Some(f) = &self.row {
            f(row);
        }
    }

    fn on_complete(&self, completion: &Completion) {
        if let Some(f) = &self.complete {
            f(completion);
        }
    }

    fn on_error(&self, message: &str) {
        if let Some(f) = &self.error {
            f(message);
        }
    }
}

/// Where a stream's events go.
#[derive(Clone)]
pub enum StreamSink {
    /// Invoke callbacks inline on the reader task.
    Callback(Arc<dyn StreamHandler>),
    /// Push into a bounded channel. Never waits: a full channel is reported
    /// back so the caller can drop the stream.
    Channel(mpsc::Sender<StreamEvent>),
}

/// What happened to one delivered event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Handed to the callback or queued on the channel.
    Delivered,
    /// The channel consumer is gone.
    Closed,
    /// The channel consumer is not keeping up; the event was not queued.
    Full,
}

impl StreamSink {
    pub(crate) fn deliver(&self, event: StreamEvent) -> Delivery {
        match self {
            Self::Callback(handler) => {
                match &event {
                    StreamEvent::Metadata(meta) => handler.on_metadata(meta),
                    StreamEvent::Row(row) => handler.on_row(row),
                    StreamEvent::Complete(done) => handler.on_complete(done),
                    StreamEvent::Error(message) => handler.on_error(message),
                }
                Delivery::Delivered
            }
            Self::Channel(tx) => match tx.try_send(event) {
                Ok(()) => Delivery::Delivered,
                Err(TrySendError::Closed(_)) => {
                    trace!("stream receiver dropped");
                    Delivery::Closed
                }
                Err(TrySendError::Full(_)) => Delivery::Full,
            },
        }
    }
}

impl std::fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("StreamSink::Callback"),
            Self::Channel(_) => f.write_str("StreamSink::Channel"),
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

struct Entry {
    sink: StreamSink,
    token: u64,
    created_at: Instant,
    first_event_at: Option<Instant>,
}

/// Timing of one registered stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    /// When the stream was registered.
    pub created_at: Instant,
    /// When its first metadata or data frame arrived.
    pub first_event_at: Option<Instant>,
}

type Entries = DashMap<StreamId, Entry>;

/// Concurrent map of open streams. Clones share the same map.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    entries: Arc<Entries>,
    next_token: Arc<AtomicU64>,
}

impl StreamRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` under `stream_id`, replacing any previous entry.
    pub fn register(&self, stream_id: StreamId, sink: StreamSink) -> StreamRegistration {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            sink,
            token,
            created_at: Instant::now(),
            first_event_at: None,
        };
        if self.entries.insert(stream_id.clone(), entry).is_some() {
            debug!(%stream_id, "stream re-registered, previous handlers replaced");
        }
        StreamRegistration {
            stream_id,
            token,
            entries: Arc::downgrade(&self.entries),
        }
    }

    /// Sink for `stream_id`, if registered.
    #[must_use]
    pub fn lookup(&self, stream_id: &StreamId) -> Option<StreamSink> {
        self.entries.get(stream_id).map(|e| e.sink.clone())
    }

    /// Remove `stream_id`. Returns whether an entry existed.
    pub fn remove(&self, stream_id: &StreamId) -> bool {
        self.entries.remove(stream_id).is_some()
    }

    /// Drop every entry without notifying anyone. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Timing for `stream_id`, if registered.
    #[must_use]
    pub fn info(&self, stream_id: &StreamId) -> Option<StreamInfo> {
        self.entries.get(stream_id).map(|e| StreamInfo {
            created_at: e.created_at,
            first_event_at: e.first_event_at,
        })
    }

    /// Record the first metadata/data arrival. Later calls keep the first time.
    pub(crate) fn mark_first_event(&self, stream_id: &StreamId) {
        if let Some(mut entry) = self.entries.get_mut(stream_id) {
            let _ = entry.first_event_at.get_or_insert_with(Instant::now);
        }
    }

    /// Whether `stream_id` is registered.
    #[must_use]
    pub fn contains(&self, stream_id: &StreamId) -> bool {
        self.entries.contains_key(stream_id)
    }

    /// Number of registered streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no stream is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Capability to remove one registration.
///
/// Dropping it does nothing; call [`deregister`](Self::deregister).
#[derive(Debug)]
pub struct StreamRegistration {
    stream_id: StreamId,
    token: u64,
    entries: Weak<Entries>,
}

impl StreamRegistration {
    /// The registered stream.
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Remove the entry this registration created. Returns whether it was
    /// still present.
    pub fn deregister(&self) -> bool {
        let Some(entries) = self.entries.upgrade() else {
            return false;
        };
        entries
            .remove_if(&self.stream_id, |_, entry| entry.token == self.token)
            .is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
