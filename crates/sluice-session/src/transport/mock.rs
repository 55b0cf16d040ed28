//! Scripted in-memory transport for unit tests.
//!
//! Each `connect` pops the next [`Outcome`] (default `Accept`). An accepted
//! link hands a [`MockServer`] to the test through the receiver returned by
//! [`MockConnector::new`]. Dropping the `MockServer` ends the link uncleanly.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connector, FrameSink, FrameSource, Link, TransportError, TransportEvent};

/// Result of one scripted connect.
#[derive(Clone, Debug)]
pub(crate) enum Outcome {
    Accept,
    Refuse(String),
    Hang,
}

/// Something the client wrote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Sent {
    Text(String),
    Close { code: u16, reason: String },
}

pub(crate) struct MockConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
    connects: AtomicUsize,
    servers: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            outcomes: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            servers,
        });
        (connector, rx)
    }

    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.outcomes.lock().extend(outcomes);
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Link, TransportError> {
        let _ = self.connects.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcomes.lock().pop_front().unwrap_or(Outcome::Accept);
        match outcome {
            Outcome::Accept => {
                let (sent_tx, sent_rx) = mpsc::unbounded_channel();
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let _ = self.servers.send(MockServer {
                    sent: sent_rx,
                    inbound: inbound_tx,
                });
                Ok((
                    Box::new(MockSink { tx: sent_tx }),
                    Box::new(MockSource { rx: inbound_rx }),
                ))
            }
            Outcome::Refuse(reason) => Err(TransportError::Connect(reason)),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

/// Server end of one accepted link.
pub(crate) struct MockServer {
    pub(crate) sent: mpsc::UnboundedReceiver<Sent>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl MockServer {
    pub(crate) fn push(&self, text: impl Into<String>) {
        let _ = self.inbound.send(TransportEvent::Text(text.into()));
    }

    pub(crate) fn push_json(&self, value: &serde_json::Value) {
        self.push(value.to_string());
    }

    pub(crate) fn close_clean(&self) {
        let _ = self.inbound.send(TransportEvent::Closed { clean: true });
    }

    pub(crate) async fn next_sent(&mut self) -> Option<Sent> {
        self.sent.recv().await
    }

    /// Next text frame parsed as JSON, skipping close frames.
    pub(crate) async fn next_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.sent.recv().await? {
                Sent::Text(text) => return serde_json::from_str(&text).ok(),
                Sent::Close { .. } => {}
            }
        }
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<Sent>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(Sent::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.tx
            .send(Sent::Close {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| TransportError::Closed)
    }
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn next(&mut self) -> TransportEvent {
        self.rx
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed { clean: false })
    }
}
