//! Corpus discovery and content-derived document ids.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::rag::chunking::{chunk_lines, Chunk, ChunkParams};

/// Bytes inspected by [`is_text_file`].
const SNIFF_LEN: usize = 8192;

/// Read block size used while hashing.
const HASH_BLOCK: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("notes directory {0} does not exist")]
    MissingRoot(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk notes directory: {0}")]
    Walk(#[from] walkdir::Error),
}

impl ScanError {
    fn read(path: &Path, source: std::io::Error) -> Self {
        ScanError::Read {
            path: path.display().to_string(),
            source,
        }
    }
}

/// A supported file found under the corpus root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub path: PathBuf,
    /// Path relative to the corpus root, `/`-separated
    pub source: String,
}

/// Result of comparing the corpus against a previously indexed id set.
#[derive(Debug, Default)]
pub struct Classification {
    /// New or modified documents, in scan order
    pub changed: Vec<Document>,
    /// Ids of present documents whose content is already indexed
    pub unchanged: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentScanner {
    root: PathBuf,
    hash_len: usize,
    hash_file_name: bool,
}

impl DocumentScanner {
    pub fn new(root: impl Into<PathBuf>, hash_len: usize, hash_file_name: bool) -> Self {
        Self {
            root: root.into(),
            hash_len,
            hash_file_name,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content-derived id of a file: SHA256 over (optionally) the file name
    /// and then the file bytes, hex encoded and truncated.
    pub fn stable_id(&self, path: &Path) -> Result<String, ScanError> {
        let file = File::open(path).map_err(|e| ScanError::read(path, e))?;
        let mut reader = BufReader::with_capacity(HASH_BLOCK, file);

        let mut hasher = Sha256::new();
        if self.hash_file_name {
            if let Some(name) = path.file_name() {
                hasher.update(name.to_string_lossy().as_bytes());
            }
        }

        let mut block = vec![0u8; HASH_BLOCK];
        loop {
            let read = reader.read(&mut block).map_err(|e| ScanError::read(path, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&block[..read]);
        }

        let mut id = format!("{:x}", hasher.finalize());
        id.truncate(self.hash_len);
        log::debug!("document id {} -> {id}", path.display());
        Ok(id)
    }

    /// Every supported file under the root, sorted by relative path.
    pub fn scan(&self) -> Result<Vec<Document>, ScanError> {
        if !self.root.is_dir() {
            return Err(ScanError::MissingRoot(self.root.display().to_string()));
        }

        let mut documents = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !is_text_file(path).map_err(|e| ScanError::read(path, e))? {
                log::debug!("skipping unsupported file {}", path.display());
                continue;
            }

            documents.push(Document {
                id: self.stable_id(path)?,
                path: path.to_path_buf(),
                source: self.source_of(path),
            });
        }

        Ok(documents)
    }

    /// Split the current corpus into documents that need embedding and ids
    /// that are already indexed.
    ///
    /// Only files present now are considered; ids in `old_ids` with no
    /// matching file are not reported.
    pub fn classify(&self, old_ids: &HashSet<String>) -> Result<Classification, ScanError> {
        let mut result = Classification::default();

        for document in self.scan()? {
            if old_ids.contains(&document.id) {
                result.unchanged.insert(document.id);
            } else {
                result.changed.push(document);
            }
        }

        let absent = old_ids.len().saturating_sub(result.unchanged.len());
        if absent > 0 {
            log::debug!("{absent} previously indexed documents are no longer present or changed");
        }

        Ok(result)
    }

    /// Chunk the current content of one document.
    pub fn chunk_document(&self, document: &Document, params: ChunkParams) -> Result<Vec<Chunk>, ScanError> {
        let file = File::open(&document.path).map_err(|e| ScanError::read(&document.path, e))?;
        let lines = read_lines(BufReader::new(file)).map_err(|e| ScanError::read(&document.path, e))?;

        Ok(chunk_lines(lines, &document.id, &document.source, params))
    }

    /// Chunks of every supported document, in scan order.
    pub fn load_corpus(&self, params: ChunkParams) -> Result<Vec<Chunk>, ScanError> {
        let mut chunks = Vec::new();
        for document in self.scan()? {
            chunks.extend(self.chunk_document(&document, params)?);
        }
        Ok(chunks)
    }

    fn source_of(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Non-empty, trimmed lines of a UTF-8 text (invalid bytes are replaced).
fn read_lines(mut reader: impl BufRead) -> std::io::Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// A file is indexable when it is non-empty and its first bytes look like
/// UTF-8 text without NUL bytes.
pub fn is_text_file(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut head)?;

    if head.is_empty() || head.contains(&0) {
        return Ok(false);
    }

    match std::str::from_utf8(&head) {
        Ok(_) => Ok(true),
        // a code point cut off by the sniff window is fine
        Err(e) => Ok(e.error_len().is_none()),
    }
}
