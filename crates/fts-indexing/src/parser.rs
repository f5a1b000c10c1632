//! File content extraction for the document bridge.
//!
//! A [`ParserRegistry`] maps MIME types to [`FileParser`]s. A per-batch
//! [`ParserSession`] opens readers through the registry, hands back lazy
//! [`TextChunks`], and keeps every reader it opened until `close_all` is
//! called at the end of the batch.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use fts_types::FileRef;

/// An open stream over file content.
pub trait ContentReader: Read + Send {
    /// Release the underlying resource.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens readers for one family of file formats.
pub trait FileParser: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, path: &Path) -> io::Result<Box<dyn ContentReader>>;
}

/// Reader over a plain file on disk.
pub struct FileContentReader {
    file: Option<File>,
}

impl Read for FileContentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Ok(0),
        }
    }
}

impl ContentReader for FileContentReader {
    fn close(&mut self) -> io::Result<()> {
        drop(self.file.take());
        Ok(())
    }
}

/// Parser for text-like formats, read as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextParser;

impl FileParser for PlainTextParser {
    fn name(&self) -> &str {
        "plain_text"
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn ContentReader>> {
        Ok(Box::new(FileContentReader {
            file: Some(File::open(path)?),
        }))
    }
}

/// MIME types handled by [`PlainTextParser`] in the default registry.
pub const PLAIN_TEXT_TYPES: &[&str] = &[
    "text/*",
    "application/json",
    "application/xml",
    "application/x-yaml",
];

/// MIME type to parser lookup, with the file-size cap.
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn FileParser>>,
    wildcard: Option<Arc<dyn FileParser>>,
    max_file_size: u64,
}

impl ParserRegistry {
    /// Empty registry.
    pub fn new(max_file_size: u64) -> Self {
        Self {
            parsers: HashMap::new(),
            wildcard: None,
            max_file_size,
        }
    }

    /// Registry with the plain text parser for text-like types.
    pub fn with_defaults(max_file_size: u64) -> Self {
        let mut registry = Self::new(max_file_size);
        let plain: Arc<dyn FileParser> = Arc::new(PlainTextParser);
        for mime in PLAIN_TEXT_TYPES {
            registry.register(mime, plain.clone());
        }
        registry
    }

    /// Register a parser for a MIME type. `type/*` matches every subtype.
    pub fn register(&mut self, mime: &str, parser: Arc<dyn FileParser>) {
        self.parsers.insert(mime.to_ascii_lowercase(), parser);
    }

    /// Parser used when nothing more specific matches.
    pub fn set_wildcard(&mut self, parser: Arc<dyn FileParser>) {
        self.wildcard = Some(parser);
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Exact type, then `type/*`, then the wildcard parser.
    pub fn lookup(&self, mime: &str) -> Option<Arc<dyn FileParser>> {
        let mime = mime.to_ascii_lowercase();
        let essence = mime.split(';').next().unwrap_or(&mime).trim();
        if let Some(parser) = self.parsers.get(essence) {
            return Some(parser.clone());
        }
        if let Some((top, _)) = essence.split_once('/') {
            if let Some(parser) = self.parsers.get(&format!("{}/*", top)) {
                return Some(parser.clone());
            }
        }
        self.wildcard.clone()
    }
}

/// MIME type of a file: the declared one, else a guess from its extension.
pub fn mime_type(file: &FileRef) -> Option<String> {
    file.mimetype
        .clone()
        .filter(|m| !m.trim().is_empty())
        .or_else(|| {
            mime_guess::from_path(&file.path)
                .first()
                .or_else(|| mime_guess::from_path(&file.name).first())
                .map(|m| m.essence_str().to_string())
        })
}

struct OpenReader {
    file_id: u64,
    reader: Option<BufReader<Box<dyn ContentReader>>>,
}

type SharedReader = Arc<Mutex<OpenReader>>;

/// Lazy, finite sequence of text chunks (one per line) from a file.
///
/// Not restartable. Yields nothing once the owning session has closed the
/// reader.
pub struct TextChunks {
    reader: Option<SharedReader>,
}

impl TextChunks {
    pub fn empty() -> Self {
        Self { reader: None }
    }

    /// Join every remaining chunk with newlines.
    pub fn collect_text(self) -> String {
        self.collect::<Vec<_>>().join("\n")
    }
}

impl Iterator for TextChunks {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let shared = self.reader.as_ref()?;
        let mut open = shared.lock().unwrap_or_else(PoisonError::into_inner);
        let file_id = open.file_id;
        let reader = open.reader.as_mut()?;

        let mut line = Vec::new();
        let result = reader.read_until(b'\n', &mut line);
        drop(open);

        match result {
            Ok(0) => {
                self.reader = None;
                None
            }
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                Some(text.trim_end_matches(['\n', '\r']).to_string())
            }
            Err(e) => {
                warn!(file_id, error = %e, "Failed reading file content");
                self.reader = None;
                None
            }
        }
    }
}

/// Outcome of closing a session's readers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CloseReport {
    pub closed: usize,
    pub failed: usize,
}

/// Per-batch parsing context that owns every reader it opens.
pub struct ParserSession {
    registry: Arc<ParserRegistry>,
    open: Vec<SharedReader>,
}

impl ParserSession {
    pub fn new(registry: Arc<ParserRegistry>) -> Self {
        Self {
            registry,
            open: Vec::new(),
        }
    }

    /// Text chunks of a file's content.
    ///
    /// Empty when there is no file, the file cannot be read, no parser
    /// matches its type, or it is larger than the configured maximum.
    pub fn parse(&mut self, file: Option<&FileRef>) -> TextChunks {
        let Some(file) = file else {
            return TextChunks::empty();
        };

        let path = Path::new(&file.path);
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!(file_id = file.id, path = %file.path, error = %e, "File not readable");
                return TextChunks::empty();
            }
        };

        let max = self.registry.max_file_size();
        if size > max {
            warn!(
                file_id = file.id,
                path = %file.path,
                size,
                max,
                "File exceeds maximum size, indexed without content"
            );
            return TextChunks::empty();
        }

        let Some(mime) = mime_type(file) else {
            debug!(file_id = file.id, "Unknown file type");
            return TextChunks::empty();
        };
        let Some(parser) = self.registry.lookup(&mime) else {
            debug!(file_id = file.id, mime = %mime, "No parser for file type");
            return TextChunks::empty();
        };

        match parser.open(path) {
            Ok(reader) => {
                let shared = Arc::new(Mutex::new(OpenReader {
                    file_id: file.id,
                    reader: Some(BufReader::new(reader)),
                }));
                self.open.push(shared.clone());
                debug!(file_id = file.id, parser = parser.name(), "Opened file content");
                TextChunks {
                    reader: Some(shared),
                }
            }
            Err(e) => {
                warn!(file_id = file.id, path = %file.path, error = %e, "Failed to open file");
                TextChunks::empty()
            }
        }
    }

    /// Number of readers opened and not yet closed
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Close every reader opened by this session. Each close is attempted
    /// even if an earlier one fails.
    pub fn close_all(&mut self) -> CloseReport {
        let mut report = CloseReport::default();
        for shared in self.open.drain(..) {
            let mut open = shared.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(reader) = open.reader.take() else {
                continue;
            };
            match reader.into_inner().close() {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    warn!(file_id = open.file_id, error = %e, "Failed to close file content");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

impl Drop for ParserSession {
    fn drop(&mut self) {
        if !self.open.is_empty() {
            self.close_all();
        }
    }
}
