//! Typed per-stream events.
//!
//! Every inbound frame addressed to a stream is normalized into exactly one
//! [`StreamEvent`] at the codec boundary. A well-behaved stream yields
//! `Metadata` once, then any number of `Row`s, then exactly one terminal
//! event (`Complete` or `Error`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column schema, sent once per stream before any row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Column names, in row order.
    pub columns: Vec<String>,
}

/// Terminal success summary.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Completion {
    /// Rows the server reports having sent.
    pub rows: u64,
    /// Server status word (`completed`, `cancelled`, `ok`, ...).
    pub status: String,
}

/// One normalized event for a single stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Column schema.
    Metadata(Metadata),
    /// One result row, aligned to the metadata columns.
    Row(Vec<Value>),
    /// Terminal success.
    Complete(Completion),
    /// Terminal failure reported by the server.
    Error(String),
}

impl StreamEvent {
    /// Whether this event closes out the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error(_))
    }

    /// Wire name of the message kind this event came from.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Metadata(_) => "metadata",
            Self::Row(_) => "data",
            Self::Complete(_) => "complete",
            Self::Error(_) => "error",
        }
    }
}
