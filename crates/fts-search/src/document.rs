//! Document mapping from indexer documents to Tantivy documents.

use std::collections::BTreeMap;

use tantivy::schema::OwnedValue;
use tantivy::TantivyDocument;

use fts_types::{fields, Document, FieldValue};

use crate::schema::SearchSchema;

/// Convert an indexer document to a Tantivy document.
///
/// `doc_id`, `entity_type` and `entity_id` come from the document header.
/// Known field names map onto schema fields; everything else is collected
/// into the `attributes` JSON object, keeping repeated values as arrays.
pub fn to_tantivy_doc(schema: &SearchSchema, document: &Document) -> TantivyDocument {
    let mut doc = TantivyDocument::default();
    doc.add_text(schema.doc_id, document.doc_id());
    doc.add_text(schema.entity_type, &document.entity_type);
    doc.add_u64(schema.entity_id, document.entity_id);

    let mut attributes: BTreeMap<String, Vec<OwnedValue>> = BTreeMap::new();

    for field in &document.fields {
        if field.name == fields::ENTITY_TYPE {
            continue;
        }

        match (schema.field_for(&field.name), &field.value) {
            (Some(target), FieldValue::Timestamp(ts)) if schema.is_date_field(target) => {
                doc.add_date(
                    target,
                    tantivy::DateTime::from_timestamp_millis(ts.timestamp_millis()),
                );
            }
            (Some(target), value) if !schema.is_date_field(target) => {
                doc.add_text(target, value.as_text());
            }
            _ => {
                attributes
                    .entry(field.name.clone())
                    .or_default()
                    .push(OwnedValue::Str(field.value.as_text()));
            }
        }
    }

    if !attributes.is_empty() {
        let object = attributes
            .into_iter()
            .map(|(name, mut values)| {
                let value = if values.len() == 1 {
                    values.remove(0)
                } else {
                    OwnedValue::Array(values)
                };
                (name, value)
            })
            .collect();
        doc.add_object(schema.attributes, object);
    }

    doc
}
