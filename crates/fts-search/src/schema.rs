//! Tantivy schema definition for entity documents.
//!
//! Well-known document fields get their own Tantivy field. Anything else
//! (map annotation keys, custom bridge fields) lands in the JSON
//! `attributes` field under its document field name.

use tantivy::schema::{Field, Schema, FAST, INDEXED, STORED, STRING, TEXT};

use fts_types::fields;

use crate::SearchError;

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct SearchSchema {
    schema: Schema,
    /// Primary key "Type:id" (STRING | STORED)
    pub doc_id: Field,
    /// Entity type name (STRING | STORED)
    pub entity_type: Field,
    /// Entity id (u64, INDEXED | STORED | FAST)
    pub entity_id: Field,
    pub name: Field,
    pub description: Field,
    /// Catch-all analyzed field (TEXT)
    pub combined_fields: Field,
    pub file_name: Field,
    /// MIME type of the file content (STRING | STORED)
    pub file_format: Field,
    /// Extracted file text (TEXT, not stored)
    pub file_contents: Field,
    pub tag: Field,
    pub comment: Field,
    pub term: Field,
    pub annotation_ns: Field,
    pub annotation_type: Field,
    pub owner: Field,
    pub group: Field,
    pub permissions: Field,
    pub created: Field,
    pub updated: Field,
    /// Dynamic fields as a JSON object (TEXT | STORED)
    pub attributes: Field,
}

impl SearchSchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create a SearchSchema from an existing Tantivy Schema
    pub fn from_schema(schema: Schema) -> Result<Self, SearchError> {
        let get = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| SearchError::SchemaMismatch(format!("missing {} field", name)))
        };

        Ok(Self {
            doc_id: get("doc_id")?,
            entity_type: get("entity_type")?,
            entity_id: get("entity_id")?,
            name: get("name")?,
            description: get("description")?,
            combined_fields: get("combined_fields")?,
            file_name: get("file_name")?,
            file_format: get("file_format")?,
            file_contents: get("file_contents")?,
            tag: get("tag")?,
            comment: get("comment")?,
            term: get("term")?,
            annotation_ns: get("annotation_ns")?,
            annotation_type: get("annotation_type")?,
            owner: get("owner")?,
            group: get("group")?,
            permissions: get("permissions")?,
            created: get("created")?,
            updated: get("updated")?,
            attributes: get("attributes")?,
            schema,
        })
    }

    /// Tantivy field for a well-known document field name.
    ///
    /// Returns None for names that belong in `attributes`.
    pub fn field_for(&self, name: &str) -> Option<Field> {
        let field = match name {
            fields::NAME => self.name,
            fields::DESCRIPTION => self.description,
            fields::COMBINED => self.combined_fields,
            fields::FILE_NAME => self.file_name,
            fields::FILE_FORMAT => self.file_format,
            fields::FILE_CONTENTS => self.file_contents,
            fields::TAG => self.tag,
            fields::COMMENT => self.comment,
            fields::TERM => self.term,
            fields::ANNOTATION_NS => self.annotation_ns,
            fields::ANNOTATION_TYPE => self.annotation_type,
            fields::OWNER => self.owner,
            fields::GROUP => self.group,
            fields::PERMISSIONS => self.permissions,
            fields::CREATED => self.created,
            fields::UPDATED => self.updated,
            _ => return None,
        };
        Some(field)
    }

    /// Whether a field holds dates
    pub fn is_date_field(&self, field: Field) -> bool {
        field == self.created || field == self.updated
    }

    /// Fields searched by default for free-text queries
    pub fn default_search_fields(&self) -> Vec<Field> {
        vec![
            self.combined_fields,
            self.name,
            self.description,
            self.file_contents,
        ]
    }
}

/// Build the entity document schema.
pub fn build_entity_schema() -> SearchSchema {
    let mut schema_builder = Schema::builder();

    let doc_id = schema_builder.add_text_field("doc_id", STRING | STORED);
    let entity_type = schema_builder.add_text_field("entity_type", STRING | STORED);
    let entity_id = schema_builder.add_u64_field("entity_id", INDEXED | STORED | FAST);

    let name = schema_builder.add_text_field("name", TEXT | STORED);
    let description = schema_builder.add_text_field("description", TEXT | STORED);
    let combined_fields = schema_builder.add_text_field("combined_fields", TEXT);

    let file_name = schema_builder.add_text_field("file_name", TEXT | STORED);
    let file_format = schema_builder.add_text_field("file_format", STRING | STORED);
    // Contents can be large; searchable only
    let file_contents = schema_builder.add_text_field("file_contents", TEXT);

    let tag = schema_builder.add_text_field("tag", TEXT | STORED);
    let comment = schema_builder.add_text_field("comment", TEXT | STORED);
    let term = schema_builder.add_text_field("term", TEXT | STORED);
    let annotation_ns = schema_builder.add_text_field("annotation_ns", STRING | STORED);
    let annotation_type = schema_builder.add_text_field("annotation_type", STRING | STORED);

    let owner = schema_builder.add_text_field("owner", STRING | STORED);
    let group = schema_builder.add_text_field("group", STRING | STORED);
    let permissions = schema_builder.add_text_field("permissions", STRING | STORED);
    let created = schema_builder.add_date_field("created", INDEXED | STORED);
    let updated = schema_builder.add_date_field("updated", INDEXED | STORED);

    let attributes = schema_builder.add_json_field("attributes", TEXT | STORED);

    let schema = schema_builder.build();

    SearchSchema {
        schema,
        doc_id,
        entity_type,
        entity_id,
        name,
        description,
        combined_fields,
        file_name,
        file_format,
        file_contents,
        tag,
        comment,
        term,
        annotation_ns,
        annotation_type,
        owner,
        group,
        permissions,
        created,
        updated,
        attributes,
    }
}
