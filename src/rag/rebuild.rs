//! Incremental rebuild.
//!
//! Records of unchanged documents are copied from the previous index together
//! with their stored vectors, in old slot order. Changed documents are then
//! re-chunked and embedded, in scan order. Everything goes to temp files that
//! replace the live index only once the whole pass succeeded.
//!
//! When the previous index cannot be read (missing, damaged, written by
//! another model, or its two halves come from different commits) the rebuild
//! falls back to a full build over the whole corpus.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;

use crate::rag::builder::{BuildError, IndexBuilder, SlotWriter};
use crate::rag::chunking::ChunkParams;
use crate::rag::embeddings::Embedder;
use crate::rag::meta_store::{MetaStore, MetaStoreError};
use crate::rag::scanner::{Document, DocumentScanner, ScanError};
use crate::rag::vector_index::{IndexError, VectorIndex};
use crate::rag::vector_storage::VectorStorage;
use crate::storage::StorageLayout;

#[derive(Debug, thiserror::Error)]
pub enum RebuildError {
    #[error("no content after rebuild")]
    NoContent,

    #[error("previous index is unreadable: {0}")]
    PreviousUnreadable(String),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("metadata error: {0}")]
    Meta(MetaStoreError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

impl From<MetaStoreError> for RebuildError {
    fn from(e: MetaStoreError) -> Self {
        if e.is_unreadable() {
            RebuildError::PreviousUnreadable(e.to_string())
        } else {
            RebuildError::Meta(e)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildMode {
    Incremental,
    Full,
}

#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub mode: RebuildMode,
    /// Slots in the new index
    pub total: usize,
    /// Slots whose vectors were copied from the previous index
    pub reused: usize,
    /// Slots whose vectors were computed in this pass
    pub embedded: usize,
    pub elapsed: Duration,
}

pub struct IncrementalRebuilder<'a> {
    embedder: &'a dyn Embedder,
    layout: &'a StorageLayout,
    scanner: &'a DocumentScanner,
    params: ChunkParams,
    batch_size: usize,
}

impl<'a> IncrementalRebuilder<'a> {
    pub fn new(
        embedder: &'a dyn Embedder,
        layout: &'a StorageLayout,
        scanner: &'a DocumentScanner,
        params: ChunkParams,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            layout,
            scanner,
            params,
            batch_size,
        }
    }

    /// Build a new index from the unchanged part of the previous one plus
    /// fresh embeddings for `changed`.
    ///
    /// Nothing live is touched unless the pass succeeds.
    pub fn rebuild(
        &self,
        changed: &[Document],
        unchanged: &HashSet<String>,
    ) -> Result<(VectorIndex, RebuildReport), RebuildError> {
        let started = Instant::now();

        let result = match self.incremental(changed, unchanged, started) {
            Err(RebuildError::PreviousUnreadable(reason)) => {
                log::warn!("incremental rebuild not possible ({reason}), falling back to a full build");
                self.full_build_from(started)
            }
            other => other,
        };

        match &result {
            Ok((_, report)) => log::info!(
                "rebuild ({:?}) finished in {:.2?}: {} slots, {} reused, {} embedded",
                report.mode,
                report.elapsed,
                report.total,
                report.reused,
                report.embedded
            ),
            Err(_) => self.layout.discard_temp(),
        }

        result
    }

    /// Re-chunk and re-embed the whole corpus.
    pub fn full_build(&self) -> Result<(VectorIndex, RebuildReport), RebuildError> {
        self.full_build_from(Instant::now())
    }

    fn full_build_from(&self, started: Instant) -> Result<(VectorIndex, RebuildReport), RebuildError> {
        let chunks = self.scanner.load_corpus(self.params)?;
        if chunks.is_empty() {
            return Err(RebuildError::NoContent);
        }

        let total = chunks.len();
        let index = IndexBuilder::new(self.embedder, self.layout, self.batch_size).build(chunks)?;

        Ok((
            index,
            RebuildReport {
                mode: RebuildMode::Full,
                total,
                reused: 0,
                embedded: total,
                elapsed: started.elapsed(),
            },
        ))
    }

    fn incremental(
        &self,
        changed: &[Document],
        unchanged: &HashSet<String>,
        started: Instant,
    ) -> Result<(VectorIndex, RebuildReport), RebuildError> {
        let model_id = self.embedder.model_id_hash();
        let (old_vectors, mut old_meta) = self.open_previous(&model_id)?;

        let progress = ProgressBar::new_spinner().with_message("rebuilding index");
        let mut writer = SlotWriter::create(self.layout, self.embedder, self.batch_size, progress)?;

        let mut reused = 0;
        for slot in 0..old_meta.len() {
            let record = old_meta.get(slot)?;
            if !unchanged.contains(&record.document_id) {
                continue;
            }
            let vector = old_vectors.reconstruct(slot)?;
            writer.push_vector(vector, record)?;
            reused += 1;
        }

        // release the old files before they get replaced
        drop(old_meta);
        drop(old_vectors);

        for document in changed {
            for chunk in self.scanner.chunk_document(document, self.params)? {
                writer.push_chunk(chunk)?;
            }
        }

        let written = writer.finish()?;
        if written.total == 0 {
            return Err(RebuildError::NoContent);
        }

        let (total, embedded) = (written.total, written.embedded);
        let index = written.commit(self.layout, &model_id)?;

        Ok((
            index,
            RebuildReport {
                mode: RebuildMode::Incremental,
                total,
                reused,
                embedded,
                elapsed: started.elapsed(),
            },
        ))
    }

    fn open_previous(&self, model_id: &[u8; 32]) -> Result<(VectorIndex, MetaStore), RebuildError> {
        let mut meta = MetaStore::open(&self.layout.meta_log(), &self.layout.meta_idx())?;
        let fingerprint = meta.fingerprint()?;

        let vectors = VectorStorage::new(self.layout.vectors())
            .load(model_id, fingerprint)
            .map_err(|e| {
                if e.is_stale() {
                    RebuildError::PreviousUnreadable(e.to_string())
                } else {
                    RebuildError::Build(BuildError::Storage(e))
                }
            })?;

        if vectors.len() != meta.len() {
            return Err(RebuildError::PreviousUnreadable(format!(
                "{} metadata records but {} vectors",
                meta.len(),
                vectors.len()
            )));
        }

        Ok((vectors, meta))
    }
}
