//! Search documents.
//!
//! A [`Document`] is the flat field map derived from one entity snapshot.
//! The search engine treats it as a unit: indexing a document for an id
//! replaces whatever was stored for that id before.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known field names emitted by the document bridge.
pub mod fields {
    pub const ENTITY_TYPE: &str = "entity_type";
    pub const NAME: &str = "name";
    pub const DESCRIPTION: &str = "description";
    /// Catch-all text field searched by default queries
    pub const COMBINED: &str = "combined_fields";
    pub const FILE_NAME: &str = "file.name";
    pub const FILE_FORMAT: &str = "file.format";
    pub const FILE_CONTENTS: &str = "file.contents";
    pub const TAG: &str = "tag";
    pub const COMMENT: &str = "comment";
    pub const TERM: &str = "term";
    /// Prefix for key/value pairs from map annotations ("map.<key>")
    pub const MAP_PREFIX: &str = "map.";
    pub const ANNOTATION_NS: &str = "annotation.ns";
    pub const ANNOTATION_TYPE: &str = "annotation.type";
    pub const OWNER: &str = "details.owner";
    pub const GROUP: &str = "details.group";
    pub const CREATED: &str = "details.created";
    pub const UPDATED: &str = "details.updated";
    pub const PERMISSIONS: &str = "details.permissions";
}

/// Value of a document field and how the engine should treat it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Tokenized, for free-text search
    Text(String),
    /// Not analyzed, for exact filtering
    Keyword(String),
    /// Point in time, for range filtering
    Timestamp(#[serde(with = "chrono::serde::ts_milliseconds")] DateTime<Utc>),
}

impl FieldValue {
    /// String form of the value (timestamps as epoch milliseconds).
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Text(s) | FieldValue::Keyword(s) => s.clone(),
            FieldValue::Timestamp(t) => t.timestamp_millis().to_string(),
        }
    }
}

/// A single named field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocField {
    pub name: String,
    pub value: FieldValue,
    /// Whether the engine should keep the raw value for retrieval
    pub stored: bool,
}

/// Flat searchable representation of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub entity_type: String,
    pub entity_id: u64,
    pub fields: Vec<DocField>,
}

impl Document {
    /// Create an empty document for the given entity.
    pub fn new(entity_type: impl Into<String>, entity_id: u64) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            fields: Vec::new(),
        }
    }

    /// Unique key of the document in the index ("Image:10").
    pub fn doc_id(&self) -> String {
        doc_id(&self.entity_type, self.entity_id)
    }

    /// Add an analyzed text field (not stored).
    pub fn add_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.push(name, FieldValue::Text(value.into()), false);
    }

    /// Add an analyzed text field that is also stored.
    pub fn add_stored_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.push(name, FieldValue::Text(value.into()), true);
    }

    /// Add a not-analyzed, stored keyword field.
    pub fn add_keyword(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.push(name, FieldValue::Keyword(value.into()), true);
    }

    /// Add a stored timestamp field.
    pub fn add_timestamp(&mut self, name: impl Into<String>, value: DateTime<Utc>) {
        self.push(name, FieldValue::Timestamp(value), true);
    }

    /// Add text to the combined catch-all field.
    pub fn add_combined(&mut self, value: impl Into<String>) {
        self.add_text(fields::COMBINED, value);
    }

    fn push(&mut self, name: impl Into<String>, value: FieldValue, stored: bool) {
        self.fields.push(DocField {
            name: name.into(),
            value,
            stored,
        });
    }

    /// All values recorded under a field name, in insertion order.
    pub fn values(&self, name: &str) -> Vec<&FieldValue> {
        self.fields
            .iter()
            .filter(|f| f.name == name)
            .map(|f| &f.value)
            .collect()
    }

    /// First value under a field name as a string.
    pub fn first_text(&self, name: &str) -> Option<String> {
        self.values(name).first().map(|v| v.as_text())
    }

    /// Whether any value was recorded under a field name.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

/// Build the index key for an entity type and id.
pub fn doc_id(entity_type: &str, entity_id: u64) -> String {
    format!("{}:{}", entity_type, entity_id)
}
