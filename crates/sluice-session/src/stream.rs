//! Pull-based handle over one query's events.
//!
//! A [`QueryStream`] is a lazy, finite, non-restartable `futures::Stream` of
//! [`StreamEvent`]s: `Metadata`, then `Row`s, then exactly one terminal event,
//! then `None`. When the connection drops before a terminal event the stream
//! simply ends and reports [`StreamState::Abandoned`].

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use sluice_core::{ResultSet, StreamEvent, StreamId};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::registry::StreamRegistration;

/// Lifecycle of one stream session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Registered and query sent; nothing received yet.
    Open,
    /// At least one metadata or data frame received.
    Streaming,
    /// Server reported success.
    Complete,
    /// Server reported failure.
    Error,
    /// Ended without a terminal frame (connection lost or torn down).
    Abandoned,
}

impl StreamState {
    /// Whether no further events will arrive.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Abandoned)
    }
}

/// Events of one query, in wire order.
///
/// Dropping the handle removes the local registration without telling the
/// server; use [`QuerySession::cancel_query`](crate::QuerySession::cancel_query)
/// to stop the query remotely.
pub struct QueryStream {
    stream_id: StreamId,
    events: ReceiverStream<StreamEvent>,
    registration: StreamRegistration,
    state: StreamState,
    opened_at: Instant,
    first_event_at: Option<Instant>,
}

impl QueryStream {
    pub(crate) fn new(
        stream_id: StreamId,
        events: mpsc::Receiver<StreamEvent>,
        registration: StreamRegistration,
    ) -> Self {
        Self {
            stream_id,
            events: ReceiverStream::new(events),
            registration,
            state: StreamState::Open,
            opened_at: Instant::now(),
            first_event_at: None,
        }
    }

    /// Identifier the query was sent with.
    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// When the query was opened.
    #[must_use]
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// When the first metadata or data event was pulled.
    #[must_use]
    pub fn first_event_at(&self) -> Option<Instant> {
        self.first_event_at
    }

    /// Time spent waiting for a first event, or `None` once one arrived.
    #[must_use]
    pub fn waiting_for_data(&self) -> Option<Duration> {
        match self.first_event_at {
            Some(_) => None,
            None if self.state.is_finished() => None,
            None => Some(self.opened_at.elapsed()),
        }
    }

    /// Stop listening locally. No wire message is sent and the stream ends
    /// as [`StreamState::Abandoned`] unless it already finished.
    pub fn abandon(&mut self) {
        let _ = self.registration.deregister();
        self.events.close();
        if !self.state.is_finished() {
            debug!(stream_id = %self.stream_id, "stream abandoned locally");
            self.state = StreamState::Abandoned;
        }
    }

    /// Drain the remaining events into a [`ResultSet`].
    pub async fn collect_result(mut self) -> ResultSet {
        let mut set = ResultSet::new();
        while let Some(event) = self.next().await {
            set.apply(event);
        }
        if self.state == StreamState::Abandoned {
            set.abandon();
        }
        set
    }

    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Metadata(_) | StreamEvent::Row(_) => {
                let _ = self.first_event_at.get_or_insert_with(Instant::now);
                self.state = StreamState::Streaming;
            }
            StreamEvent::Complete(_) => self.state = StreamState::Complete,
            StreamEvent::Error(_) => self.state = StreamState::Error,
        }
    }
}

impl Stream for QueryStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state.is_finished() {
            return Poll::Ready(None);
        }
        match this.events.poll_next_unpin(cx) {
            Poll::Ready(Some(event)) => {
                this.observe(&event);
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                debug!(stream_id = %this.stream_id, "stream ended without terminal event");
                this.state = StreamState::Abandoned;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        let _ = self.registration.deregister();
    }
}

impl std::fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream")
            .field("stream_id", &self.stream_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
