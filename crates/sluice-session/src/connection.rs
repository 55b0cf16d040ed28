//! # Connection manager
//!
//! Owns the single physical link and its lifecycle:
//!
//! ```text
//!              connect()                 handshake ok
//! Disconnected ─────────► Connecting ─────────────────► Connected
//!      ▲                      │ timeout / error              │
//!      └──────────────────────┘                              │ unclean loss
//!      ▲                                                     ▼
//!      └──── attempts exhausted ─────────────────────── Reconnecting
//! ```
//!
//! - A connect in flight is shared: every caller joining it awaits the same
//!   [`futures::future::Shared`] result, so only one socket is ever opened.
//! - The write half sits behind an async mutex. Every outbound frame takes
//!   it, so concurrent sends never interleave.
//! - One reader task per link feeds frames to the [`MessageRouter`] in
//!   arrival order.
//! - On an unclean loss all open streams are abandoned and a single
//!   reconnect loop runs, driven by a [`ReconnectSchedule`]. A clean close
//!   or [`ConnectionManager::disconnect`] never reconnects.
//!
//! Every link gets a generation number. A reader whose generation is stale
//! (the link was replaced or torn down) is ignored when it reports a loss.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use sluice_core::SessionError;
use sluice_core::constants::{CLIENT_CLOSE_REASON, NORMAL_CLOSE_CODE};
use sluice_settings::ConnectionSettings;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reconnect::ReconnectSchedule;
use crate::router::MessageRouter;
use crate::transport::{Connector, FrameSink, FrameSource, Link, TransportEvent};

/// Capacity of the connection event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Observable connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link, nothing in flight.
    Disconnected,
    /// First handshake in flight.
    Connecting,
    /// Link up.
    Connected,
    /// Link lost uncleanly; the reconnect loop is running.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// Lifecycle notifications published on [`ConnectionManager::subscribe`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A link came up (first connect or reconnect).
    Connected,
    /// The link went away. `clean` is false for unclean losses.
    Disconnected {
        /// Whether the close was clean.
        clean: bool,
    },
    /// A reconnect attempt is about to wait one interval and then dial.
    ReconnectScheduled {
        /// 1-based attempt number.
        attempt: u32,
        /// Attempt budget.
        max: u32,
    },
    /// A reconnect attempt failed.
    ReconnectFailed {
        /// 1-based attempt number.
        attempt: u32,
        /// Why it failed.
        error: String,
    },
    /// The attempt budget is spent; the connection stays down.
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

type SharedConnect = Shared<BoxFuture<'static, Result<(), SessionError>>>;

struct Pending {
    result: SharedConnect,
    cancel: CancellationToken,
}

enum Phase {
    Disconnected { exhausted: Option<u32> },
    Connecting(Pending),
    Connected,
    Reconnecting(Pending),
}

struct State {
    phase: Phase,
    generation: u64,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

struct Inner {
    url: String,
    handshake_timeout: Duration,
    schedule: Mutex<ReconnectSchedule>,
    connector: Arc<dyn Connector>,
    router: Arc<MessageRouter>,
    state: Mutex<State>,
    writer: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// Owns the one link to the query server. Clones share the same link.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Manager for `settings.url()` that feeds inbound frames to `router`.
    ///
    /// Nothing is dialed until the first [`connect`](Self::connect).
    pub fn new(
        settings: &ConnectionSettings,
        connector: Arc<dyn Connector>,
        router: Arc<MessageRouter>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                url: settings.url(),
                handshake_timeout: Duration::from_millis(settings.handshake_timeout_ms),
                schedule: Mutex::new(ReconnectSchedule::from_settings(settings)),
                connector,
                router,
                state: Mutex::new(State {
                    phase: Phase::Disconnected { exhausted: None },
                    generation: 0,
                    reader: None,
                    closed: false,
                }),
                writer: tokio::sync::Mutex::new(None),
                events,
            }),
        }
    }

    /// Server address.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match self.inner.state.lock().phase {
            Phase::Disconnected { .. } => ConnectionState::Disconnected,
            Phase::Connecting(_) => ConnectionState::Connecting,
            Phase::Connected => ConnectionState::Connected,
            Phase::Reconnecting(_) => ConnectionState::Reconnecting,
        }
    }

    /// Whether the link is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Attempts made by the current (or last) reconnect loop; 0 after any
    /// successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.schedule.lock().attempts()
    }

    /// `Some(attempts)` when automatic reconnection gave up and nobody has
    /// reconnected since.
    #[must_use]
    pub fn exhausted(&self) -> Option<u32> {
        match self.inner.state.lock().phase {
            Phase::Disconnected { exhausted } => exhausted,
            _ => None,
        }
    }

    /// Receive lifecycle events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Bring the link up, or join the attempt already in flight.
    ///
    /// Resolves immediately when connected. While reconnecting, resolves with
    /// the outcome of the reconnect loop. When disconnected (including after
    /// exhaustion) this starts a fresh connect.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let pending = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(SessionError::SessionClosed);
            }
            let in_flight = match &state.phase {
                Phase::Connected => return Ok(()),
                Phase::Connecting(p) | Phase::Reconnecting(p) => Some(p.result.clone()),
                Phase::Disconnected { .. } => None,
            };
            match in_flight {
                Some(result) => result,
                None => Inner::start_connect(&self.inner, &mut state),
            }
        };
        pending.await
    }

    /// No-op when connected; otherwise [`connect`](Self::connect).
    pub async fn ensure_connected(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            return Ok(());
        }
        self.connect().await
    }

    /// Write one text frame. Sends are serialized on the writer lock.
    pub async fn send(&self, text: String) -> Result<(), SessionError> {
        let mut writer = self.inner.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        sink.send(text)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    /// Close the link gracefully. Stops any connect or reconnect in flight,
    /// abandons open streams, and never triggers reconnection.
    pub async fn disconnect(&self) {
        self.inner.shutdown(false).await;
    }

    /// Disconnect for good; later connects fail with `SessionClosed`.
    pub async fn close(&self) {
        self.inner.shutdown(true).await;
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Start a first connect. Caller holds the state lock.
    fn start_connect(self: &Arc<Self>, state: &mut State) -> SharedConnect {
        let cancel = CancellationToken::new();
        let result = Self::connect_once(self.clone(), cancel.clone()).boxed().shared();
        state.phase = Phase::Connecting(Pending {
            result: result.clone(),
            cancel,
        });
        drop(tokio::spawn(result.clone()));
        result
    }

    /// Start the reconnect loop. Caller holds the state lock.
    fn start_reconnect(self: &Arc<Self>, state: &mut State) {
        let cancel = CancellationToken::new();
        let result = Self::reconnect_loop(self.clone(), cancel.clone())
            .boxed()
            .shared();
        state.phase = Phase::Reconnecting(Pending {
            result: result.clone(),
            cancel,
        });
        drop(tokio::spawn(result));
    }

    async fn connect_once(self: Arc<Self>, cancel: CancellationToken) -> Result<(), SessionError> {
        info!(url = %self.url, "connecting");
        let result = match self.open_link(&cancel).await {
            Ok(link) => self.install(link, &cancel).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            let mut state = self.state.lock();
            if !cancel.is_cancelled() {
                state.phase = Phase::Disconnected { exhausted: None };
            }
            warn!(url = %self.url, error = %e, "connect failed");
        }
        result
    }

    async fn reconnect_loop(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<(), SessionError> {
        self.schedule.lock().reset();
        loop {
            // Claimed under the lock, waited on a copy.
            let (attempt, schedule) = {
                let mut schedule = self.schedule.lock();
                let Some(attempt) = schedule.next_attempt() else {
                    break;
                };
                (attempt, schedule.clone())
            };
            info!(
                attempt,
                max = schedule.max_attempts(),
                delay_ms = u64::try_from(schedule.interval().as_millis()).unwrap_or(u64::MAX),
                "scheduling reconnect"
            );
            self.emit(ConnectionEvent::ReconnectScheduled {
                attempt,
                max: schedule.max_attempts(),
            });
            if !schedule.wait(&cancel).await {
                debug!(attempt, "reconnect cancelled");
                return Err(self.cancelled_error());
            }

            match self.open_link(&cancel).await {
                Ok(link) => return self.install(link, &cancel).await,
                Err(e) if cancel.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    self.emit(ConnectionEvent::ReconnectFailed {
                        attempt,
                        error: e.to_string(),
                    });
                }
            }
        }

        let attempts = self.schedule.lock().attempts();
        {
            let mut state = self.state.lock();
            if !cancel.is_cancelled() {
                state.phase = Phase::Disconnected {
                    exhausted: Some(attempts),
                };
            }
        }
        warn!(attempts, url = %self.url, "reconnection exhausted, giving up");
        self.emit(ConnectionEvent::ReconnectExhausted { attempts });
        Err(SessionError::ReconnectExhausted { attempts })
    }

    /// Dial once, bounded by the handshake timeout.
    async fn open_link(&self, cancel: &CancellationToken) -> Result<Link, SessionError> {
        let dial = tokio::time::timeout(self.handshake_timeout, self.connector.connect(&self.url));
        tokio::select! {
            () = cancel.cancelled() => Err(self.cancelled_error()),
            result = dial => match result {
                Err(_) => Err(SessionError::ConnectTimeout {
                    url: self.url.clone(),
                    timeout_ms: u64::try_from(self.handshake_timeout.as_millis()).unwrap_or(u64::MAX),
                }),
                Ok(Err(e)) => Err(SessionError::ConnectError {
                    url: self.url.clone(),
                    reason: e.to_string(),
                }),
                Ok(Ok(link)) => Ok(link),
            },
        }
    }

    /// Make `link` the live link and start its reader.
    async fn install(
        self: &Arc<Self>,
        link: Link,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let (sink, source) = link;
        let mut writer = self.writer.lock().await;
        {
            let mut state = self.state.lock();
            if cancel.is_cancelled() || state.closed {
                // disconnect() won the race; the link is dropped unused
                return Err(self.cancelled_error_locked(&state));
            }
            state.generation += 1;
            state.phase = Phase::Connected;
            let generation = state.generation;
            state.reader = Some(tokio::spawn(Self::read_loop(self.clone(), source, generation)));
            *writer = Some(sink);
        }
        drop(writer);

        self.schedule.lock().reset();
        info!(url = %self.url, "connected");
        self.emit(ConnectionEvent::Connected);
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut source: Box<dyn FrameSource>, generation: u64) {
        loop {
            match source.next().await {
                TransportEvent::Text(text) => self.router.route(&text),
                TransportEvent::Closed { clean } => {
                    self.link_lost(generation, clean).await;
                    return;
                }
            }
        }
    }

    async fn link_lost(self: &Arc<Self>, generation: u64, clean: bool) {
        let mut writer = self.writer.lock().await;
        let reconnecting = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.generation += 1;
            drop(state.reader.take());
            drop(writer.take());

            let abandoned = self.router.abandon_all();
            let reconnect = !clean && !state.closed && self.schedule.lock().max_attempts() > 0;
            if clean {
                info!(abandoned, "server closed the connection");
            } else {
                warn!(abandoned, "connection lost");
            }
            self.emit(ConnectionEvent::Disconnected { clean });

            if reconnect {
                self.start_reconnect(&mut state);
            } else {
                state.phase = Phase::Disconnected { exhausted: None };
            }
            reconnect
        };
        drop(writer);
        debug!(reconnecting, "link teardown complete");
    }

    async fn shutdown(&self, close: bool) {
        let mut writer = self.writer.lock().await;
        let (sink, was_up) = {
            let mut state = self.state.lock();
            if close {
                state.closed = true;
            }
            let previous = std::mem::replace(
                &mut state.phase,
                Phase::Disconnected { exhausted: None },
            );
            let was_up = match previous {
                Phase::Connecting(p) | Phase::Reconnecting(p) => {
                    p.cancel.cancel();
                    true
                }
                Phase::Connected => true,
                Phase::Disconnected { .. } => false,
            };
            state.generation += 1;
            if let Some(reader) = state.reader.take() {
                reader.abort();
            }
            (writer.take(), was_up)
        };
        drop(writer);

        let abandoned = self.router.abandon_all();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close(NORMAL_CLOSE_CODE, CLIENT_CLOSE_REASON).await {
                debug!(error = %e, "close frame not sent");
            }
        }
        if was_up {
            info!(abandoned, url = %self.url, "disconnected");
            self.emit(ConnectionEvent::Disconnected { clean: true });
        }
    }

    fn cancelled_error(&self) -> SessionError {
        self.cancelled_error_locked(&self.state.lock())
    }

    fn cancelled_error_locked(&self, state: &State) -> SessionError {
        if state.closed {
            SessionError::SessionClosed
        } else {
            SessionError::NotConnected
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Handlers, StreamRegistry, StreamSink};
    use crate::transport::mock::{MockConnector, MockServer, Outcome, Sent};
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    struct Harness {
        manager: ConnectionManager,
        connector: Arc<MockConnector>,
        servers: mpsc::UnboundedReceiver<MockServer>,
        registry: StreamRegistry,
    }

    fn harness(max_reconnect_attempts: u32) -> Harness {
        let settings = ConnectionSettings {
            max_reconnect_attempts,
            reconnect_interval_ms: 3000,
            handshake_timeout_ms: 5000,
            ..ConnectionSettings::default()
        };
        let (connector, servers) = MockConnector::new();
        let registry = StreamRegistry::new();
        let router = Arc::new(MessageRouter::new(registry.clone()));
        let manager = ConnectionManager::new(&settings, connector.clone(), router);
        Harness {
            manager,
            connector,
            servers,
            registry,
        }
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<ConnectionEvent>,
        pred: impl Fn(&ConnectionEvent) -> bool,
    ) -> Vec<ConnectionEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(600), events.recv())
                .await
                .expect("timed out waiting for connection event")
                .expect("event channel closed");
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn noop_stream(registry: &StreamRegistry, id: &str) {
        let _ = registry.register(id.into(), StreamSink::Callback(Arc::new(Handlers::new())));
    }

    #[tokio::test]
    async fn connect_and_send() {
        let mut h = harness(5);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        h.manager.connect().await.unwrap();
        assert_eq!(h.manager.state(), ConnectionState::Connected);

        let mut server = h.servers.recv().await.unwrap();
        h.manager.send("hello".into()).await.unwrap();
        assert_eq!(server.next_sent().await, Some(Sent::Text("hello".into())));
    }

    #[tokio::test]
    async fn send_while_disconnected_fails() {
        let h = harness(5);
        assert_matches!(
            h.manager.send("x".into()).await,
            Err(SessionError::NotConnected)
        );
    }

    #[tokio::test]
    async fn ensure_connected_reuses_live_link() {
        let h = harness(5);
        h.manager.ensure_connected().await.unwrap();
        h.manager.ensure_connected().await.unwrap();
        h.manager.connect().await.unwrap();
        assert_eq!(h.connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_share_one_attempt() {
        let h = harness(5);
        let (a, b, c) = tokio::join!(
            h.manager.connect(),
            h.manager.ensure_connected(),
            h.manager.connect()
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(h.connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout() {
        let h = harness(5);
        h.connector.script([Outcome::Hang]);
        let start = Instant::now();
        let err = h.manager.connect().await.unwrap_err();
        assert_matches!(err, SessionError::ConnectTimeout { timeout_ms: 5000, .. });
        assert_eq!(start.elapsed(), Duration::from_millis(5000));
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn joiners_share_timeout_error() {
        let h = harness(5);
        h.connector.script([Outcome::Hang]);
        let (a, b) = tokio::join!(h.manager.connect(), h.manager.ensure_connected());
        assert_matches!(a, Err(SessionError::ConnectTimeout { .. }));
        assert_eq!(a, b);
        assert_eq!(h.connector.connects(), 1);
    }

    #[tokio::test]
    async fn connect_error_surfaces() {
        let h = harness(5);
        h.connector.script([Outcome::Refuse("connection refused".into())]);
        let err = h.manager.connect().await.unwrap_err();
        assert_matches!(err, SessionError::ConnectError { ref reason, .. } if reason == "connection refused");
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        // A failed first connect does not start reconnection; the next call dials again.
        h.manager.connect().await.unwrap();
        assert_eq!(h.connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_unclean_loss() {
        let mut h = harness(5);
        h.manager.connect().await.unwrap();
        let mut events = h.manager.subscribe();
        let server = h.servers.recv().await.unwrap();
        noop_stream(&h.registry, "Q1");

        h.connector.script([
            Outcome::Refuse("refused".into()),
            Outcome::Refuse("refused".into()),
            Outcome::Accept,
        ]);
        let lost_at = Instant::now();
        drop(server);

        let seen = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Connected)).await;
        let attempts: Vec<u32> = seen
            .iter()
            .filter_map(|e| match e {
                ConnectionEvent::ReconnectScheduled { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert!(seen.contains(&ConnectionEvent::Disconnected { clean: false }));

        let elapsed = lost_at.elapsed();
        assert!(elapsed >= Duration::from_millis(9000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(10_000), "{elapsed:?}");

        assert_eq!(h.manager.reconnect_attempts(), 0);
        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert_eq!(h.connector.connects(), 4);
        assert!(h.registry.is_empty(), "open streams are abandoned");
    }

    #[tokio::test(start_paused = true)]
    async fn each_loss_gets_a_fresh_attempt_budget() {
        let mut h = harness(2);
        h.manager.connect().await.unwrap();
        let mut events = h.manager.subscribe();

        for _ in 0..2 {
            h.connector.script([Outcome::Refuse("refused".into()), Outcome::Accept]);
            drop(h.servers.recv().await.unwrap());
            let seen = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Connected)).await;
            let attempts: Vec<u32> = seen
                .iter()
                .filter_map(|e| match e {
                    ConnectionEvent::ReconnectScheduled { attempt, .. } => Some(*attempt),
                    _ => None,
                })
                .collect();
            assert_eq!(attempts, vec![1, 2]);
            assert_eq!(h.manager.reconnect_attempts(), 0);
        }
        assert_eq!(h.connector.connects(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_connected_waits_for_reconnect() {
        let mut h = harness(5);
        let mut events = h.manager.subscribe();
        h.manager.connect().await.unwrap();
        drop(h.servers.recv().await.unwrap());

        let _ = wait_for(&mut events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })).await;
        assert_eq!(h.manager.state(), ConnectionState::Reconnecting);
        h.manager.ensure_connected().await.unwrap();
        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert_eq!(h.connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_leaves_disconnected_until_manual_connect() {
        let mut h = harness(2);
        let mut events = h.manager.subscribe();
        h.manager.connect().await.unwrap();
        h.connector.script([
            Outcome::Refuse("down".into()),
            Outcome::Refuse("down".into()),
        ]);
        drop(h.servers.recv().await.unwrap());

        let seen = wait_for(&mut events, |e| {
            matches!(e, ConnectionEvent::ReconnectExhausted { .. })
        })
        .await;
        assert_eq!(
            seen.last(),
            Some(&ConnectionEvent::ReconnectExhausted { attempts: 2 })
        );
        assert_eq!(
            seen.iter()
                .filter(|e| matches!(e, ConnectionEvent::ReconnectFailed { .. }))
                .count(),
            2
        );
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.manager.exhausted(), Some(2));
        assert_eq!(h.manager.reconnect_attempts(), 2);

        // Nothing more happens on its own.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.connector.connects(), 3);

        h.manager.ensure_connected().await.unwrap();
        assert_eq!(h.connector.connects(), 4);
        assert_eq!(h.manager.exhausted(), None);
        assert_eq!(h.manager.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_during_reconnect_sees_exhaustion() {
        let mut h = harness(1);
        let mut events = h.manager.subscribe();
        h.manager.connect().await.unwrap();
        h.connector.script([Outcome::Refuse("down".into())]);
        drop(h.servers.recv().await.unwrap());

        let _ = wait_for(&mut events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })).await;
        assert_matches!(
            h.manager.connect().await,
            Err(SessionError::ReconnectExhausted { attempts: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clean_close_does_not_reconnect() {
        let mut h = harness(5);
        let mut events = h.manager.subscribe();
        h.manager.connect().await.unwrap();
        let server = h.servers.recv().await.unwrap();
        noop_stream(&h.registry, "Q1");

        server.close_clean();
        let _ = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.connector.connects(), 1);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_never_reconnects() {
        let mut h = harness(0);
        let mut events = h.manager.subscribe();
        h.manager.connect().await.unwrap();
        drop(h.servers.recv().await.unwrap());

        let _ = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_sends_close_and_stays_down() {
        let mut h = harness(5);
        h.manager.connect().await.unwrap();
        let mut server = h.servers.recv().await.unwrap();
        noop_stream(&h.registry, "Q1");

        h.manager.disconnect().await;
        assert_eq!(
            server.next_sent().await,
            Some(Sent::Close {
                code: 1000,
                reason: "Client disconnecting".into()
            })
        );
        drop(server);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.connector.connects(), 1);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_reconnect_loop() {
        let mut h = harness(5);
        let mut events = h.manager.subscribe();
        h.manager.connect().await.unwrap();
        drop(h.servers.recv().await.unwrap());
        let _ = wait_for(&mut events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })).await;

        let waiter = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.ensure_connected().await })
        };
        tokio::task::yield_now().await;
        h.manager.disconnect().await;

        assert_matches!(waiter.await.unwrap(), Err(SessionError::NotConnected));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.connector.connects(), 1);
    }

    #[tokio::test]
    async fn closed_manager_rejects_connect() {
        let h = harness(5);
        h.manager.connect().await.unwrap();
        h.manager.close().await;
        assert_matches!(h.manager.connect().await, Err(SessionError::SessionClosed));
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
