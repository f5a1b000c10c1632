//! Key encoding and decoding for storage layer.
//!
//! Numeric components are zero-padded to 20 digits so that RocksDB's
//! lexicographic order matches numeric order, which enables prefix and
//! range scans:
//! - `ent:{Kind}:{id:020}` entity snapshots
//! - `log:{sequence:020}` event log records
//! - `link:{annotation_id:020}:{Kind}:{id:020}` annotation -> parent links
//! - `marker:{Kind}:{id:020}` pending change markers
//! - `checkpoint:{name}` cursor watermarks

use fts_types::{EntityKind, EntityRef};

use crate::error::StorageError;

fn utf8(bytes: &[u8]) -> Result<&str, StorageError> {
    std::str::from_utf8(bytes).map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))
}

fn parse_kind(s: &str) -> Result<EntityKind, StorageError> {
    EntityKind::parse(s).ok_or_else(|| StorageError::Key(format!("Unknown entity kind: {}", s)))
}

fn parse_u64(s: &str, what: &str) -> Result<u64, StorageError> {
    s.parse()
        .map_err(|e| StorageError::Key(format!("Invalid {}: {}", what, e)))
}

/// Key for entity snapshots
/// Format: ent:{Kind}:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: u64,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("ent:{}:{:020}", self.kind.as_str(), self.id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "ent" {
            return Err(StorageError::Key(format!("Invalid entity key format: {}", s)));
        }
        Ok(Self {
            kind: parse_kind(parts[1])?,
            id: parse_u64(parts[2], "entity id")?,
        })
    }

    /// Prefix covering every entity of one kind, in id order
    pub fn kind_prefix(kind: EntityKind) -> Vec<u8> {
        format!("ent:{}:", kind.as_str()).into_bytes()
    }
}

/// Key for event log records
/// Format: log:{sequence:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogKey {
    /// Monotonic sequence number
    pub sequence: u64,
}

impl LogKey {
    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("log:{:020}", self.sequence).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 || parts[0] != "log" {
            return Err(StorageError::Key(format!("Invalid log key format: {}", s)));
        }
        Ok(Self {
            sequence: parse_u64(parts[1], "sequence")?,
        })
    }
}

/// Key linking an annotation to one parent entity
/// Format: link:{annotation_id:020}:{Kind}:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkKey {
    pub annotation_id: u64,
    pub parent: EntityRef,
}

impl LinkKey {
    pub fn new(annotation_id: u64, parent: EntityRef) -> Self {
        Self {
            annotation_id,
            parent,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "link:{:020}:{}:{:020}",
            self.annotation_id,
            self.parent.kind.as_str(),
            self.parent.id
        )
        .into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 || parts[0] != "link" {
            return Err(StorageError::Key(format!("Invalid link key format: {}", s)));
        }
        Ok(Self {
            annotation_id: parse_u64(parts[1], "annotation id")?,
            parent: EntityRef::new(parse_kind(parts[2])?, parse_u64(parts[3], "parent id")?),
        })
    }

    /// Prefix covering every parent of one annotation
    pub fn annotation_prefix(annotation_id: u64) -> Vec<u8> {
        format!("link:{:020}:", annotation_id).into_bytes()
    }
}

/// Key for a pending change marker
/// Format: marker:{Kind}:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerKey {
    pub target: EntityRef,
}

impl MarkerKey {
    pub fn new(target: EntityRef) -> Self {
        Self { target }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("marker:{}:{:020}", self.target.kind.as_str(), self.target.id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "marker" {
            return Err(StorageError::Key(format!("Invalid marker key format: {}", s)));
        }
        Ok(Self {
            target: EntityRef::new(parse_kind(parts[1])?, parse_u64(parts[2], "marker id")?),
        })
    }
}

/// Key for checkpoint entries
/// Format: checkpoint:{name}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    /// Cursor name (e.g., "fulltext", "fulltext.full_scan")
    pub name: String,
}

impl CheckpointKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("checkpoint:{}", self.name).into_bytes()
    }
}
