//! End-to-end test infrastructure for the full-text indexer.
//!
//! Provides a [`TestHarness`] wiring real RocksDB storage and a real Tantivy
//! index in a temp directory, plus helpers for building entities and files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use fts_indexing::{
    Backlog, DocumentBridge, FullTextIndexer, IndexStores, IndexerConfig, ParserRegistry,
};
use fts_scheduler::RunCoordinator;
use fts_search::{EntitySearcher, SearchIndex, SearchIndexConfig, SearchIndexer};
use fts_storage::Storage;
use fts_types::{Details, Entity, EntityKind, Experimenter, FileRef, Group};

/// Storage, index and collaborators for one scenario.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    pub index: SearchIndex,
    pub stores: IndexStores,
    pub parsers: Arc<ParserRegistry>,
    /// Where [`TestHarness::write_file`] puts file content
    pub files_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_max_file_size(1024 * 1024)
    }

    /// Harness whose parsers skip files larger than `max_file_size` bytes.
    pub fn with_max_file_size(max_file_size: u64) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(
            Storage::open(&temp_dir.path().join("db")).expect("Failed to open test storage"),
        );
        let index = SearchIndex::open_or_create(SearchIndexConfig::new(temp_dir.path().join("index")))
            .expect("Failed to open test index");
        let engine = Arc::new(SearchIndexer::new(&index).expect("Failed to open index writer"));
        let stores = IndexStores::from_storage(storage.clone(), engine);

        let files_dir = temp_dir.path().join("files");
        std::fs::create_dir_all(&files_dir).expect("Failed to create files dir");

        Self {
            _temp_dir: temp_dir,
            storage,
            index,
            stores,
            parsers: Arc::new(ParserRegistry::with_defaults(max_file_size)),
            files_dir,
        }
    }

    /// An event-log indexer over this harness with default settings.
    pub fn indexer(&self) -> FullTextIndexer {
        self.indexer_with(IndexerConfig::default(), DocumentBridge::new())
    }

    pub fn indexer_with(&self, config: IndexerConfig, bridge: DocumentBridge) -> FullTextIndexer {
        FullTextIndexer::from_stores(
            config,
            &self.stores,
            Arc::new(Backlog::new()),
            self.parsers.clone(),
        )
        .expect("Failed to open indexer")
        .with_bridge(bridge)
    }

    /// A coordinator around a fresh indexer.
    pub fn coordinator(&self, bridge: DocumentBridge) -> Arc<RunCoordinator> {
        let indexer = self.indexer_with(IndexerConfig::default(), bridge);
        Arc::new(
            RunCoordinator::new(
                indexer,
                self.stores.clone(),
                self.parsers.clone(),
                self.storage.clone(),
            )
            .with_shutdown_timeout(Duration::from_secs(5)),
        )
    }

    /// Searcher over the latest committed index state.
    pub fn searcher(&self) -> EntitySearcher {
        EntitySearcher::new(&self.index).expect("Failed to open searcher")
    }

    /// Write `contents` to a file and return a reference to it.
    pub fn write_file(&self, id: u64, name: &str, contents: &[u8]) -> FileRef {
        let path = self.files_dir.join(name);
        std::fs::write(&path, contents).expect("Failed to write test file");
        FileRef {
            id,
            name: name.to_string(),
            path: path.to_string_lossy().to_string(),
            mimetype: None,
            size: Some(contents.len() as u64),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed ownership metadata so repeated runs build identical documents.
pub fn test_details() -> Details {
    Details {
        owner: Experimenter {
            id: 52,
            user_name: "mlinkert".to_string(),
            first_name: "Melissa".to_string(),
            last_name: "Linkert".to_string(),
        },
        group: Group {
            id: 3,
            name: "microscopy".to_string(),
        },
        created: Utc
            .timestamp_millis_opt(1_706_540_400_000)
            .single()
            .expect("valid timestamp"),
        updated: Utc
            .timestamp_millis_opt(1_706_540_460_000)
            .single()
            .expect("valid timestamp"),
        permissions: "rwr---".to_string(),
    }
}

/// A named entity with test details.
pub fn named(kind: EntityKind, id: u64, name: &str) -> Entity {
    Entity::new(kind, id, test_details()).with_name(name)
}

/// Text of exactly `len` bytes made by repeating `word` and spaces.
pub fn text_of_len(word: &str, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        out.extend_from_slice(word.as_bytes());
        out.push(b' ');
    }
    out.truncate(len);
    out
}
