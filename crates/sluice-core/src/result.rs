//! Accumulating a stream into a result grid.
//!
//! [`ResultSet`] is the consumer-side fold of a stream's events: columns from
//! `Metadata`, rows in arrival order, and a [`StreamOutcome`] describing how
//! the stream ended.

use serde_json::Value;

use crate::events::{Completion, StreamEvent};

/// How a stream ended, or that it has not yet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StreamOutcome {
    /// No terminal event yet.
    #[default]
    Pending,
    /// Server reported success.
    Complete(Completion),
    /// Server reported failure.
    Error(String),
    /// Cancelled locally before the server answered.
    Cancelled,
    /// The connection dropped before a terminal event arrived.
    Abandoned,
}

impl StreamOutcome {
    /// Whether the stream has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Columns, rows, and outcome of one query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSet {
    /// Column names from the metadata event.
    pub columns: Vec<String>,
    /// Rows in arrival order.
    pub rows: Vec<Vec<Value>>,
    /// How the stream ended.
    pub outcome: StreamOutcome,
}

impl ResultSet {
    /// Empty, pending result set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the result set.
    ///
    /// Events after the outcome is decided are ignored.
    pub fn apply(&mut self, event: StreamEvent) {
        if self.outcome.is_finished() {
            return;
        }
        match event {
            StreamEvent::Metadata(meta) => self.columns = meta.columns,
            StreamEvent::Row(row) => self.rows.push(row),
            StreamEvent::Complete(done) => self.outcome = StreamOutcome::Complete(done),
            StreamEvent::Error(message) => self.outcome = StreamOutcome::Error(message),
        }
    }

    /// Mark a stream that ended without a terminal event.
    pub fn abandon(&mut self) {
        if !self.outcome.is_finished() {
            self.outcome = StreamOutcome::Abandoned;
        }
    }

    /// Mark a locally cancelled stream.
    pub fn cancel(&mut self) {
        if !self.outcome.is_finished() {
            self.outcome = StreamOutcome::Cancelled;
        }
    }

    /// One-line status for display.
    #[must_use]
    pub fn status_text(&self) -> String {
        match &self.outcome {
            StreamOutcome::Pending => "Executing query...".to_string(),
            StreamOutcome::Complete(done) => format!(
                "Query complete: {} rows retrieved ({})",
                done.rows, done.status
            ),
            StreamOutcome::Error(_) => "Query failed".to_string(),
            StreamOutcome::Cancelled => "Query cancelled".to_string(),
            StreamOutcome::Abandoned => "Connection lost".to_string(),
        }
    }
}

impl FromIterator<StreamEvent> for ResultSet {
    fn from_iter<I: IntoIterator<Item = StreamEvent>>(iter: I) -> Self {
        let mut set = Self::new();
        for event in iter {
            set.apply(event);
        }
        set
    }
}
