//! # Query session
//!
//! The public surface: one [`QuerySession`] per server, created explicitly and
//! shared by reference with whatever issues queries.
//!
//! Two ways to consume results:
//!
//! - **Handle**: [`QuerySession::open_query`] registers a bounded channel,
//!   sends the query and returns a [`QueryStream`].
//! - **Callbacks**: [`QuerySession::on_stream`] registers a [`StreamHandler`]
//!   under a caller-chosen [`StreamId`], then [`QuerySession::execute_query`]
//!   sends the query. Register first: a response can arrive as soon as the
//!   query is on the wire.
//!
//! Sending only waits for the link to be up and for the writer lock; results
//! arrive asynchronously through the reader task.

use std::sync::Arc;

use sluice_core::frame::{self, MessageKind, OutboundMessage};
use sluice_core::{InboundMessage, SessionError, StreamId};
use sluice_settings::SluiceSettings;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, instrument};

use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::registry::{StreamHandler, StreamInfo, StreamRegistration, StreamRegistry, StreamSink};
use crate::router::{MessageRouter, Subscription};
use crate::stream::QueryStream;
use crate::transport::{Connector, WsConnector};

/// Multiplexed query session over one reconnecting connection.
pub struct QuerySession {
    connection: ConnectionManager,
    router: Arc<MessageRouter>,
    event_buffer: usize,
}

impl QuerySession {
    /// Session over `connector`. Nothing is dialed until the first query or
    /// an explicit [`connect`](Self::connect).
    pub fn new(settings: &SluiceSettings, connector: Arc<dyn Connector>) -> Self {
        let router = Arc::new(MessageRouter::new(StreamRegistry::new()));
        let connection = ConnectionManager::new(&settings.connection, connector, router.clone());
        Self {
            connection,
            router,
            event_buffer: settings.stream.event_buffer.max(1),
        }
    }

    /// Session over a real WebSocket.
    pub fn websocket(settings: &SluiceSettings) -> Self {
        Self::new(settings, Arc::new(WsConnector))
    }

    /// The connection manager.
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The stream registry.
    #[must_use]
    pub fn registry(&self) -> &StreamRegistry {
        self.router.registry()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Connection lifecycle events.
    #[must_use]
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    /// Bring the link up. Also the manual retry after reconnection gave up.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.connection.connect().await
    }

    /// Register `handler` for `stream_id`, replacing any previous handler.
    ///
    /// The returned registration removes only this handler, locally.
    pub fn on_stream(
        &self,
        stream_id: StreamId,
        handler: impl StreamHandler + 'static,
    ) -> StreamRegistration {
        self.registry()
            .register(stream_id, StreamSink::Callback(Arc::new(handler)))
    }

    /// Call `handler` for every inbound message of `kind`.
    pub fn on_message_type(
        &self,
        kind: impl Into<MessageKind>,
        handler: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.router.subscribe(kind.into(), handler)
    }

    /// Timing of an open stream, for "no data yet" watchdogs.
    #[must_use]
    pub fn stream_info(&self, stream_id: &StreamId) -> Option<StreamInfo> {
        self.registry().info(stream_id)
    }

    /// Send `query` tagged with `stream_id`.
    ///
    /// Returns once the frame is written. Fails fast with
    /// `ReconnectExhausted` when automatic reconnection gave up.
    #[instrument(skip_all, fields(stream_id = %stream_id))]
    pub async fn execute_query(&self, query: &str, stream_id: &StreamId) -> Result<(), SessionError> {
        self.send(OutboundMessage::Query {
            query: query.to_string(),
            stream_id: stream_id.clone(),
        })
        .await
    }

    /// Ask the server to cancel `stream_id`.
    ///
    /// The stream stays registered until the server's terminal reply.
    #[instrument(skip_all, fields(stream_id = %stream_id))]
    pub async fn cancel_query(&self, stream_id: &StreamId) -> Result<(), SessionError> {
        self.send(OutboundMessage::CancelQuery {
            stream_id: stream_id.clone(),
        })
        .await
    }

    /// Open a query under a fresh stream ID and return its event stream.
    ///
    /// On a send failure the registration is removed before returning.
    pub async fn open_query(&self, query: &str) -> Result<QueryStream, SessionError> {
        let stream_id = StreamId::new();
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let registration = self
            .registry()
            .register(stream_id.clone(), StreamSink::Channel(tx));
        if let Err(e) = self.execute_query(query, &stream_id).await {
            let _ = registration.deregister();
            return Err(e);
        }
        Ok(QueryStream::new(stream_id, rx, registration))
    }

    /// Disconnect gracefully; the session can connect again later.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Disconnect for good. Later calls fail with `SessionClosed`.
    pub async fn close(&self) {
        self.connection.close().await;
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), SessionError> {
        if let Some(attempts) = self.connection.exhausted() {
            return Err(SessionError::ReconnectExhausted { attempts });
        }
        self.connection.ensure_connected().await?;
        let text = frame::encode(&message)?;
        self.connection.send(text).await?;
        debug!(kind = message.kind(), "sent control message");
        Ok(())
    }
}

impl std::fmt::Debug for QuerySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySession")
            .field("connection", &self.connection)
            .field("open_streams", &self.registry().len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
