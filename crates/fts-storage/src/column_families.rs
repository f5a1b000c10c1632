//! Column family definitions for RocksDB.
//!
//! Each column family isolates data with different access patterns:
//! - entities: Latest snapshot per entity (default compaction)
//! - event_log: Append-only change records (FIFO-like, compressed)
//! - annotation_links: Reverse index annotation -> parent entity
//! - markers: Pending change markers awaiting flush into the log
//! - checkpoints: Cursor watermarks

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for entity snapshots
pub const CF_ENTITIES: &str = "entities";

/// Column family name for the event log
pub const CF_EVENT_LOG: &str = "event_log";

/// Column family name for annotation -> parent links
pub const CF_ANNOTATION_LINKS: &str = "annotation_links";

/// Column family name for pending change markers
pub const CF_MARKERS: &str = "markers";

/// Column family name for cursor checkpoints
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[
    CF_ENTITIES,
    CF_EVENT_LOG,
    CF_ANNOTATION_LINKS,
    CF_MARKERS,
    CF_CHECKPOINTS,
];

/// Event log is append-only; compress for space
fn event_log_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_ENTITIES, Options::default()),
        ColumnFamilyDescriptor::new(CF_EVENT_LOG, event_log_options()),
        ColumnFamilyDescriptor::new(CF_ANNOTATION_LINKS, Options::default()),
        ColumnFamilyDescriptor::new(CF_MARKERS, Options::default()),
        ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
    ]
}
