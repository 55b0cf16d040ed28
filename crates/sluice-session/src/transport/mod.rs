//! Transport seam between the connection manager and the wire.
//!
//! A [`Connector`] opens one full-duplex text link and hands back its two
//! halves: a [`FrameSink`] owned by the writer lock and a [`FrameSource`]
//! owned by the reader task. [`ws::WsConnector`] is the production
//! implementation over `tokio-tungstenite`.

use async_trait::async_trait;
use thiserror::Error;

pub mod ws;

#[cfg(test)]
pub(crate) mod mock;

pub use ws::WsConnector;

/// Errors from a transport implementation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the link failed.
    #[error("{0}")]
    Connect(String),
    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),
    /// The link is already closed.
    #[error("transport closed")]
    Closed,
}

/// What the read half produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame.
    Text(String),
    /// The link ended. `clean` is true only when a close frame was received.
    Closed {
        /// Whether the peer closed with a close frame.
        clean: bool,
    },
}

/// Write half of a link.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a close frame with the given code and reason.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Read half of a link.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame. After `Closed` the source is finished.
    async fn next(&mut self) -> TransportEvent;
}

/// Both halves of a freshly opened link.
pub type Link = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens links to a server address.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one link to `url`.
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}
