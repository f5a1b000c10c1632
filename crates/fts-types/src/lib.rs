//! # fts-types
//!
//! Shared domain types for the incremental full-text indexer.
//!
//! This crate defines the data structures that flow through the pipeline:
//! - Log records: immutable change notifications read from the event log
//! - Entities: snapshots of primary-store objects and their annotation graph
//! - Documents: flat field maps handed to the search engine
//! - Settings: layered configuration for the indexer binary

pub mod config;
pub mod document;
pub mod entity;
pub mod error;
pub mod log;

pub use config::{IndexerSettings, ScheduleSettings, Settings};
pub use document::{doc_id, fields, DocField, Document, FieldValue};
pub use entity::{
    Annotation, AnnotationBody, Details, Entity, EntityKind, EntityRef, Experimenter, FileRef,
    Group,
};
pub use error::FtsError;
pub use log::{Action, LogRecord};
