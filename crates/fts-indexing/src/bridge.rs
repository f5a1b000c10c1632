//! Entity snapshot to search document conversion.
//!
//! [`DocumentBridge::build_document`] is deterministic for a given entity
//! snapshot and file content. Fields are contributed in a fixed order:
//! entity type, kind-specific content, linked annotations, ownership
//! details, then any registered [`CustomBridge`]s.

use std::sync::Arc;

use tracing::{debug, warn};

use fts_types::{fields, Annotation, AnnotationBody, Document, Entity, EntityKind, EntityRef, FileRef};

use crate::error::IndexingError;
use crate::parser::{mime_type, ParserSession};
use crate::store::ObjectStore;

/// Extra field contributor run after the built-in steps.
pub trait CustomBridge: Send + Sync {
    fn name(&self) -> &str;

    fn contribute(&self, entity: &Entity, document: &mut Document) -> Result<(), IndexingError>;
}

/// Per-batch resources the bridge reads from.
pub struct BridgeContext<'a> {
    pub parser: &'a mut ParserSession,
    pub objects: &'a dyn ObjectStore,
}

/// Built document plus entities whose documents embed this one.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeOutput {
    pub document: Document,
    /// Entities to re-derive because they embed this entity's content
    pub reindex: Vec<EntityRef>,
}

/// Converts entity snapshots into search documents.
#[derive(Default, Clone)]
pub struct DocumentBridge {
    custom: Vec<Arc<dyn CustomBridge>>,
}

impl DocumentBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom bridge. Bridges run in registration order.
    pub fn with_custom(mut self, bridge: Arc<dyn CustomBridge>) -> Self {
        self.custom.push(bridge);
        self
    }

    pub fn custom_count(&self) -> usize {
        self.custom.len()
    }

    pub fn build_document(
        &self,
        entity: &Entity,
        ctx: &mut BridgeContext<'_>,
    ) -> Result<BridgeOutput, IndexingError> {
        let mut doc = Document::new(entity.kind.as_str(), entity.id);
        doc.add_keyword(fields::ENTITY_TYPE, entity.kind.as_str());

        if let Some(name) = &entity.name {
            doc.add_stored_text(fields::NAME, name.as_str());
            doc.add_combined(name.as_str());
        }
        if let Some(description) = &entity.description {
            doc.add_stored_text(fields::DESCRIPTION, description.as_str());
            doc.add_combined(description.as_str());
        }

        let reindex = match entity.kind {
            EntityKind::Project | EntityKind::Dataset | EntityKind::Screen | EntityKind::Plate => {
                Vec::new()
            }
            EntityKind::Image | EntityKind::OriginalFile => {
                add_file(&mut doc, entity.file.as_ref(), ctx.parser);
                Vec::new()
            }
            EntityKind::TagAnnotation
            | EntityKind::CommentAnnotation
            | EntityKind::TermAnnotation
            | EntityKind::MapAnnotation
            | EntityKind::FileAnnotation => {
                if let Some(body) = &entity.body {
                    add_body(&mut doc, body, ctx.parser);
                }
                ctx.objects.annotation_parents(entity.id)?
            }
        };

        for annotation in &entity.annotations {
            add_annotation(&mut doc, annotation, ctx.parser);
        }

        add_details(&mut doc, entity);
        self.run_custom(entity, &mut doc);

        Ok(BridgeOutput {
            document: doc,
            reindex,
        })
    }

    fn run_custom(&self, entity: &Entity, doc: &mut Document) {
        for bridge in &self.custom {
            // Work on a copy so a failing bridge leaves no partial fields
            let mut scratch = doc.clone();
            match bridge.contribute(entity, &mut scratch) {
                Ok(()) => *doc = scratch,
                Err(e) => warn!(
                    bridge = bridge.name(),
                    entity = %entity.entity_ref(),
                    error = %e,
                    "Custom bridge failed"
                ),
            }
        }
    }
}

fn add_text_and_combined(doc: &mut Document, name: &str, value: &str) {
    doc.add_stored_text(name, value);
    doc.add_combined(value);
}

fn add_file(doc: &mut Document, file: Option<&FileRef>, parser: &mut ParserSession) {
    let Some(file) = file else {
        return;
    };

    add_text_and_combined(doc, fields::FILE_NAME, &file.name);
    if let Some(mime) = mime_type(file) {
        doc.add_keyword(fields::FILE_FORMAT, mime);
    }

    let contents = parser.parse(Some(file)).collect_text();
    if contents.is_empty() {
        debug!(file_id = file.id, "No file contents indexed");
        return;
    }
    doc.add_text(fields::FILE_CONTENTS, contents.as_str());
    doc.add_combined(contents);
}

fn add_body(doc: &mut Document, body: &AnnotationBody, parser: &mut ParserSession) {
    match body {
        AnnotationBody::Tag { value, description } => {
            add_text_and_combined(doc, fields::TAG, value);
            if let Some(description) = description {
                doc.add_combined(description.as_str());
            }
        }
        AnnotationBody::Comment { text } => add_text_and_combined(doc, fields::COMMENT, text),
        AnnotationBody::Term { term } => add_text_and_combined(doc, fields::TERM, term),
        AnnotationBody::Map { pairs } => {
            for (key, value) in pairs {
                add_text_and_combined(doc, &format!("{}{}", fields::MAP_PREFIX, key), value);
                doc.add_combined(key.as_str());
            }
        }
        AnnotationBody::File { file } => add_file(doc, Some(file), parser),
    }
}

fn add_annotation(doc: &mut Document, annotation: &Annotation, parser: &mut ParserSession) {
    add_body(doc, &annotation.body, parser);
    if let Some(ns) = &annotation.ns {
        doc.add_keyword(fields::ANNOTATION_NS, ns.as_str());
        doc.add_combined(ns.as_str());
    }
    let kind = annotation.body.kind().as_str();
    doc.add_keyword(fields::ANNOTATION_TYPE, kind);
    doc.add_combined(kind);
}

fn add_details(doc: &mut Document, entity: &Entity) {
    let details = &entity.details;
    doc.add_keyword(fields::OWNER, details.owner.user_name.as_str());
    doc.add_keyword(fields::GROUP, details.group.name.as_str());
    doc.add_timestamp(fields::CREATED, details.created);
    doc.add_timestamp(fields::UPDATED, details.updated);
    doc.add_keyword(fields::PERMISSIONS, details.permissions.as_str());
}
