//! Read side of the index: keyword search and lookup by document id.
//!
//! Used by the admin surface and tests to inspect what the indexer wrote.

use std::collections::BTreeMap;

use tantivy::collector::{Count, TopDocs};
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{IndexReader, TantivyDocument, Term};
use tracing::debug;

use crate::error::SearchError;
use crate::index::SearchIndex;
use crate::schema::SearchSchema;

/// A search result with relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Document id ("Image:10")
    pub doc_id: String,
    pub entity_type: String,
    pub entity_id: u64,
    /// BM25 relevance score
    pub score: f32,
}

/// Stored fields of one indexed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredDocument {
    pub doc_id: String,
    pub entity_type: String,
    pub entity_id: u64,
    /// Stored values keyed by schema field name, in insertion order
    pub fields: BTreeMap<String, Vec<String>>,
}

impl StoredDocument {
    pub fn first(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|v| v.first())
            .map(String::as_str)
    }
}

/// Searcher over entity documents.
pub struct EntitySearcher {
    reader: IndexReader,
    schema: SearchSchema,
    query_parser: QueryParser,
}

impl EntitySearcher {
    pub fn new(index: &SearchIndex) -> Result<Self, SearchError> {
        let reader = index.reader()?;
        let schema = index.schema().clone();
        let query_parser = QueryParser::for_index(index.index(), schema.default_search_fields());

        Ok(Self {
            reader,
            schema,
            query_parser,
        })
    }

    /// Reload the reader to see recent commits.
    pub fn reload(&self) -> Result<(), SearchError> {
        self.reader.reload()?;
        Ok(())
    }

    /// Run a query in Tantivy query syntax.
    ///
    /// Bare terms search the combined, name, description and file content
    /// fields; `field:term` targets one field.
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query = self.query_parser.parse_query(query_str)?;
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            hits.push(SearchHit {
                doc_id: self.text(&doc, "doc_id"),
                entity_type: self.text(&doc, "entity_type"),
                entity_id: doc
                    .get_first(self.schema.entity_id)
                    .and_then(|v| v.as_u64())
                    .unwrap_or_default(),
                score,
            });
        }

        debug!(query = query_str, results = hits.len(), "Search complete");
        Ok(hits)
    }

    /// Number of documents matching a query.
    pub fn count(&self, query_str: &str) -> Result<usize, SearchError> {
        let query = self.query_parser.parse_query(query_str)?;
        Ok(self.reader.searcher().search(&query, &Count)?)
    }

    /// Fetch the stored fields of a document by id.
    pub fn get(&self, doc_id: &str) -> Result<Option<StoredDocument>, SearchError> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.schema.doc_id, doc_id),
            IndexRecordOption::Basic,
        );
        let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;

        let Some((_, address)) = top_docs.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(address)?;

        let mut stored = StoredDocument {
            doc_id: self.text(&doc, "doc_id"),
            entity_type: self.text(&doc, "entity_type"),
            entity_id: doc
                .get_first(self.schema.entity_id)
                .and_then(|v| v.as_u64())
                .unwrap_or_default(),
            fields: BTreeMap::new(),
        };

        for (field, entry) in self.schema.schema().fields() {
            if field == self.schema.attributes {
                for value in doc.get_all(field) {
                    if let Some(object) = value.as_object() {
                        for (key, inner) in object {
                            collect_strings(inner, stored.fields.entry(key.to_string()).or_default());
                        }
                    }
                }
                continue;
            }
            for value in doc.get_all(field) {
                let text = if let Some(s) = value.as_str() {
                    s.to_string()
                } else if let Some(d) = value.as_datetime() {
                    d.into_timestamp_millis().to_string()
                } else if let Some(n) = value.as_u64() {
                    n.to_string()
                } else {
                    continue;
                };
                stored
                    .fields
                    .entry(entry.name().to_string())
                    .or_default()
                    .push(text);
            }
        }

        Ok(Some(stored))
    }

    /// Total live documents in the current reader snapshot
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn text(&self, doc: &TantivyDocument, field_name: &str) -> String {
        self.schema
            .schema()
            .get_field(field_name)
            .ok()
            .and_then(|f| doc.get_first(f).and_then(|v| v.as_str().map(str::to_string)))
            .unwrap_or_default()
    }
}

fn collect_strings<'a, V: Value<'a>>(value: V, out: &mut Vec<String>) {
    if let Some(s) = value.as_str() {
        out.push(s.to_string());
    } else if let Some(items) = value.as_array() {
        for item in items {
            collect_strings(item, out);
        }
    }
}
