//! Primary-store entity snapshots.
//!
//! An [`Entity`] is the current in-store representation of one object,
//! including the ownership metadata and annotation graph the document
//! bridge needs. Entities are serialized as JSON by the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FtsError;

/// Indexable entity kinds.
///
/// The string form is what producers write into log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Project,
    Dataset,
    Image,
    Screen,
    Plate,
    OriginalFile,
    TagAnnotation,
    CommentAnnotation,
    TermAnnotation,
    MapAnnotation,
    FileAnnotation,
}

impl EntityKind {
    /// Every kind, in full-scan enumeration order.
    pub const ALL: &'static [EntityKind] = &[
        EntityKind::Project,
        EntityKind::Dataset,
        EntityKind::Image,
        EntityKind::Screen,
        EntityKind::Plate,
        EntityKind::OriginalFile,
        EntityKind::TagAnnotation,
        EntityKind::CommentAnnotation,
        EntityKind::TermAnnotation,
        EntityKind::MapAnnotation,
        EntityKind::FileAnnotation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Project => "Project",
            EntityKind::Dataset => "Dataset",
            EntityKind::Image => "Image",
            EntityKind::Screen => "Screen",
            EntityKind::Plate => "Plate",
            EntityKind::OriginalFile => "OriginalFile",
            EntityKind::TagAnnotation => "TagAnnotation",
            EntityKind::CommentAnnotation => "CommentAnnotation",
            EntityKind::TermAnnotation => "TermAnnotation",
            EntityKind::MapAnnotation => "MapAnnotation",
            EntityKind::FileAnnotation => "FileAnnotation",
        }
    }

    /// Parse from a producer type name, returning None for unknown types.
    ///
    /// Fully qualified names ("ome.model.core.Image") are accepted by
    /// looking only at the last path segment.
    pub fn parse(s: &str) -> Option<Self> {
        let short = s.rsplit(['.', ':']).next().unwrap_or(s);
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(short))
    }

    /// Whether this kind is itself an annotation that other entities link to.
    pub fn is_annotation(&self) -> bool {
        matches!(
            self,
            EntityKind::TagAnnotation
                | EntityKind::CommentAnnotation
                | EntityKind::TermAnnotation
                | EntityKind::MapAnnotation
                | EntityKind::FileAnnotation
        )
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = FtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| FtsError::UnknownEntityType(s.to_string()))
    }
}

/// Reference to an entity by kind and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: u64,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: u64) -> Self {
        Self { kind, id }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Owner of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experimenter {
    pub id: u64,
    /// Login name
    pub user_name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// Group an entity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
}

/// Ownership, permission and timestamp metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Details {
    pub owner: Experimenter,
    pub group: Group,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated: DateTime<Utc>,

    /// Permission string, e.g. "rwr---"
    pub permissions: String,
}

/// Reference to external file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Id of the OriginalFile entity holding the bytes
    pub id: u64,
    /// Display name
    pub name: String,
    /// Location of the bytes on disk
    pub path: String,
    /// Declared MIME type, if the producer recorded one
    #[serde(default)]
    pub mimetype: Option<String>,
    /// Declared size in bytes
    #[serde(default)]
    pub size: Option<u64>,
}

/// Payload of an annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationBody {
    Tag {
        value: String,
        #[serde(default)]
        description: Option<String>,
    },
    Comment {
        text: String,
    },
    Term {
        term: String,
    },
    Map {
        pairs: Vec<(String, String)>,
    },
    File {
        file: FileRef,
    },
}

impl AnnotationBody {
    /// Entity kind corresponding to this annotation payload.
    pub fn kind(&self) -> EntityKind {
        match self {
            AnnotationBody::Tag { .. } => EntityKind::TagAnnotation,
            AnnotationBody::Comment { .. } => EntityKind::CommentAnnotation,
            AnnotationBody::Term { .. } => EntityKind::TermAnnotation,
            AnnotationBody::Map { .. } => EntityKind::MapAnnotation,
            AnnotationBody::File { .. } => EntityKind::FileAnnotation,
        }
    }
}

/// An annotation attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u64,
    /// Optional namespace qualifying the annotation
    #[serde(default)]
    pub ns: Option<String>,
    pub body: AnnotationBody,
}

impl Annotation {
    pub fn new(id: u64, body: AnnotationBody) -> Self {
        Self { id, ns: None, body }
    }

    pub fn with_ns(mut self, ns: impl Into<String>) -> Self {
        self.ns = Some(ns.into());
        self
    }
}

/// Snapshot of one primary-store object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub id: u64,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    pub details: Details,

    /// Annotations linked to this entity, in link order
    #[serde(default)]
    pub annotations: Vec<Annotation>,

    /// Backing file content for file-backed kinds
    #[serde(default)]
    pub file: Option<FileRef>,

    /// Payload when the entity is itself an annotation
    #[serde(default)]
    pub body: Option<AnnotationBody>,
}

impl Entity {
    /// Create a bare entity with no annotations or file content.
    pub fn new(kind: EntityKind, id: u64, details: Details) -> Self {
        Self {
            kind,
            id,
            name: None,
            description: None,
            details,
            annotations: Vec::new(),
            file: None,
            body: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_file(mut self, file: FileRef) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_body(mut self, body: AnnotationBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id)
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
