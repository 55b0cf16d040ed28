//! Frame codec for the streaming query protocol.
//!
//! Outbound control messages are JSON objects tagged by `type`:
//!
//! ```text
//! {"type":"query","query":"SELECT 1","streamId":"Q1"}
//! {"type":"cancelQuery","streamId":"Q1"}
//! ```
//!
//! Inbound frames carry an optional `type`, an optional `streamId`, and a
//! `data` or `error` payload. A `data` payload may arrive as structured JSON
//! or as a string holding JSON; [`decode`] resolves that once so nothing
//! downstream re-inspects payload shape. A string `error` is taken verbatim.
//!
//! A `complete` frame always yields a completion: summary fields that are
//! missing or mistyped fall back to their defaults.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::CodecError;
use crate::events::{Completion, Metadata, StreamEvent};
use crate::ids::StreamId;

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Client → server control message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Start a streaming query.
    #[serde(rename_all = "camelCase")]
    Query {
        /// Query text, passed through unparsed.
        query: String,
        /// Stream the results will be tagged with.
        stream_id: StreamId,
    },
    /// Ask the server to stop a running query.
    #[serde(rename_all = "camelCase")]
    CancelQuery {
        /// Stream to cancel.
        stream_id: StreamId,
    },
}

impl OutboundMessage {
    /// Stream this message refers to.
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        match self {
            Self::Query { stream_id, .. } | Self::CancelQuery { stream_id } => stream_id,
        }
    }

    /// Wire `type` of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Query { .. } => "query",
            Self::CancelQuery { .. } => "cancelQuery",
        }
    }
}

/// Serialize an outbound message to its JSON text frame.
pub fn encode(message: &OutboundMessage) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(|e| CodecError::Encode {
        kind: message.kind().into(),
        reason: e.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of an inbound message, from its `type` field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Column schema.
    Metadata,
    /// One row.
    Data,
    /// Terminal success.
    Complete,
    /// Terminal failure.
    Error,
    /// Any other type; delivered to global subscribers only.
    Other(String),
}

impl MessageKind {
    /// Map a wire `type` to a kind.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "metadata" => Self::Metadata,
            "data" => Self::Data,
            "complete" => Self::Complete,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire `type` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Metadata => "metadata",
            Self::Data => "data",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Other(s) => s,
        }
    }

    /// `complete` and `error` close out a stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for MessageKind {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

/// A decoded inbound frame with its payload already normalized.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    /// Message kind, if the frame carried a `type`.
    pub kind: Option<MessageKind>,
    /// Target stream, if the frame carried a `streamId`.
    pub stream_id: Option<StreamId>,
    /// Normalized `data` payload.
    pub data: Option<Value>,
    /// Error text from an `error` payload.
    pub error: Option<String>,
}

impl InboundMessage {
    /// Convert into the typed stream event for this frame.
    ///
    /// Returns `None` for frames without a kind and for kinds that carry no
    /// stream event (`Other`).
    pub fn to_event(&self) -> Option<Result<StreamEvent, CodecError>> {
        let kind = self.kind.as_ref()?;
        let event = match kind {
            MessageKind::Metadata => self.metadata().map(StreamEvent::Metadata),
            MessageKind::Data => self.row().map(StreamEvent::Row),
            MessageKind::Complete => Ok(StreamEvent::Complete(self.completion())),
            MessageKind::Error => Ok(StreamEvent::Error(self.error_text())),
            MessageKind::Other(_) => return None,
        };
        Some(event)
    }

    fn metadata(&self) -> Result<Metadata, CodecError> {
        let data = self.data.clone().ok_or_else(|| invalid("metadata", "missing data"))?;
        serde_json::from_value(data).map_err(|e| invalid("metadata", e))
    }

    fn row(&self) -> Result<Vec<Value>, CodecError> {
        match &self.data {
            Some(Value::Array(values)) => Ok(values.clone()),
            Some(other) => Err(invalid("data", format!("expected array row, got {other}"))),
            None => Err(invalid("data", "missing data")),
        }
    }

    fn completion(&self) -> Completion {
        let summary = match &self.data {
            None | Some(Value::Null) => return Completion::default(),
            Some(Value::Object(summary)) => summary,
            Some(other) => {
                warn!(summary = %other, "completion summary is not an object, using defaults");
                return Completion::default();
            }
        };

        let rows = match summary.get("rows") {
            None | Some(Value::Null) => 0,
            Some(value) => value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                .unwrap_or_else(|| {
                    warn!(rows = %value, "completion row count is not a count, using 0");
                    0
                }),
        };
        let status = match summary.get("status") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        Completion { rows, status }
    }

    fn error_text(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        match &self.data {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "unknown error".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

fn invalid(kind: &str, reason: impl fmt::Display) -> CodecError {
    CodecError::InvalidPayload {
        kind: kind.to_string(),
        reason: reason.to_string(),
    }
}

/// Decode one inbound text frame.
///
/// The frame must be a JSON object. `type` and `streamId`, when present, must
/// be strings.
pub fn decode(text: &str) -> Result<InboundMessage, CodecError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let Value::Object(mut map) = value else {
        return Err(CodecError::Malformed("frame is not a JSON object".into()));
    };

    let kind = match map.remove("type") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(MessageKind::parse(&s)),
        Some(other) => {
            return Err(CodecError::Malformed(format!("type must be a string, got {other}")));
        }
    };

    let stream_id = match map.remove("streamId") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(StreamId::from_string(s)),
        Some(other) => {
            return Err(CodecError::Malformed(format!(
                "streamId must be a string, got {other}"
            )));
        }
    };

    let data = map.remove("data").map(normalize_payload);
    let error = match map.remove("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    };

    Ok(InboundMessage {
        kind,
        stream_id,
        data,
        error,
    })
}

/// Resolve a string payload holding JSON into the structured value.
///
/// Strings that are not valid JSON are kept as plain strings.
pub fn normalize_payload(value: Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
