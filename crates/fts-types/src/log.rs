//! Event log record types.
//!
//! Producers append one record per mutation. The indexer consumes records
//! in ascending `sequence_id` order and never mutates them.

use serde::{Deserialize, Serialize};

/// What happened to the entity referenced by a log record.
///
/// Stored as the producer's action string, so any string decodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// Entity was created
    Insert,
    /// Entity was modified
    Update,
    /// Entity was removed
    Delete,
    /// Entity must be re-derived (e.g. its annotation graph changed)
    Reindex,
    /// Any other action string written by a producer
    Other(String),
}

impl Action {
    /// Parse an action string as written by producers.
    ///
    /// Matching is case-insensitive; anything unrecognised becomes
    /// [`Action::Other`] rather than an error.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Action::Insert,
            "UPDATE" => Action::Update,
            "DELETE" => Action::Delete,
            "REINDEX" => Action::Reindex,
            _ => Action::Other(s.to_string()),
        }
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &str {
        match self {
            Action::Insert => "INSERT",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::Reindex => "REINDEX",
            Action::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        Action::parse(&s)
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change notification from the event log.
///
/// Records are immutable once read and may be consumed more than once when
/// a batch is retried, so applying them must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Monotonic position in the event log
    pub sequence_id: u64,

    /// Entity type name as written by the producer (e.g. "Image")
    pub entity_type: String,

    /// Primary-store id of the entity
    pub entity_id: u64,

    /// What happened
    pub action: Action,
}

impl LogRecord {
    /// Create a new log record.
    pub fn new(
        sequence_id: u64,
        entity_type: impl Into<String>,
        entity_id: u64,
        action: Action,
    ) -> Self {
        Self {
            sequence_id,
            entity_type: entity_type.into(),
            entity_id,
            action,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
