//! # sluice-session
//!
//! Client-side streaming query session: many concurrent queries multiplexed
//! over one long-lived WebSocket.
//!
//! - **Transport**: [`transport::Connector`] seam with a `tokio-tungstenite` implementation
//! - **Connection**: [`ConnectionManager`] with single-flight connect and bounded reconnection
//! - **Reconnect schedule**: [`ReconnectSchedule`], counted and cancellable
//! - **Registry**: [`StreamRegistry`] maps stream IDs to their sinks
//! - **Router**: [`MessageRouter`] dispatches inbound frames in arrival order
//! - **Session**: [`QuerySession`], the public API, and [`QueryStream`] handles
//!
//! ```text
//! caller → QuerySession → ConnectionManager → encode → writer lock → wire
//! wire → reader task → MessageRouter → decode → StreamRegistry → sink
//! ```

#![deny(unsafe_code)]

pub mod connection;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod session;
pub mod stream;
pub mod transport;

pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use reconnect::ReconnectSchedule;
pub use registry::{Handlers, StreamHandler, StreamInfo, StreamRegistration, StreamRegistry, StreamSink};
pub use router::{MessageRouter, Subscription};
pub use session::QuerySession;
pub use stream::{QueryStream, StreamState};
