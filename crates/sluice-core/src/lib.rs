//! # sluice-core
//!
//! Foundation types shared by every sluice crate:
//!
//! - **Branded IDs**: [`StreamId`] correlates a query with all of its response frames
//! - **Errors**: [`SessionError`] and [`CodecError`] via `thiserror`
//! - **Frame codec**: [`frame::encode`] / [`frame::decode`] for the JSON wire protocol
//! - **Stream events**: [`StreamEvent`], the typed, normalized per-stream message
//! - **Result sets**: [`ResultSet`] accumulates a stream into a result grid
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod events;
pub mod frame;
pub mod ids;
pub mod logging;
pub mod result;

pub use errors::{CodecError, SessionError};
pub use events::{Completion, Metadata, StreamEvent};
pub use frame::{InboundMessage, MessageKind, OutboundMessage};
pub use ids::StreamId;
pub use result::{ResultSet, StreamOutcome};
