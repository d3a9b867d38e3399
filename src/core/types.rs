//! Session and event records consumed by the signals engine.
//!
//! These are read-only snapshots handed over by the store. Ordering of the
//! event sequences is the caller's concern (ascending occurrence time).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier type shared by every stored record.
pub type RecordId = i64;

/// A practice session bound to a single prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: RecordId,
    pub user_id: RecordId,
    pub prompt_text: String,
    pub started_at: DateTime<Utc>,
    /// `None` while the session is still active
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Whether the session has been ended.
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// One code-execution attempt inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    pub id: RecordId,
    pub session_id: RecordId,
    pub occurred_at: DateTime<Utc>,
}

/// Error output captured from a run.
///
/// Only created when the run wrote something to its error stream, so
/// `message` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub id: RecordId,
    pub run_id: RecordId,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}
