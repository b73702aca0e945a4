//! Full index build and the batch writer shared with incremental rebuilds.
//!
//! Every slot is written through [`SlotWriter`], which appends a batch to the
//! vector index and then the same records, in the same order, to the
//! metadata log. That ordering is what keeps a record and its vector at the
//! same slot.

use indicatif::{ProgressBar, ProgressStyle};

use crate::rag::chunking::Chunk;
use crate::rag::embeddings::{Embedder, EmbeddingError};
use crate::rag::meta_store::{self, MetaStoreError, MetaWriter};
use crate::rag::vector_index::{IndexError, VectorIndex};
use crate::rag::vector_storage::{VectorStorage, VectorStorageError};
use crate::storage::StorageLayout;

/// Default number of chunks per embedding call.
pub const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no chunks to index")]
    NoChunks,

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("embedder returned {got} vectors for {expected} texts")]
    EmbeddingCount { expected: usize, got: usize },

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("metadata error: {0}")]
    Meta(#[from] MetaStoreError),

    #[error("storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Appends (vector, record) pairs to a new vector index and to the temp
/// metadata files of a storage layout, batch by batch.
///
/// Vectors pushed with [`SlotWriter::push_vector`] are already known;
/// chunks pushed with [`SlotWriter::push_chunk`] are embedded when their
/// batch fills up. Switching between the two flushes the other queue first,
/// so slots come out in push order.
pub struct SlotWriter<'a> {
    embedder: &'a dyn Embedder,
    batch_size: usize,
    meta: MetaWriter,
    index: Option<VectorIndex>,
    staged: Vec<(Vec<f32>, Chunk)>,
    pending: Vec<Chunk>,
    embedded: usize,
    progress: ProgressBar,
}

impl<'a> SlotWriter<'a> {
    pub fn create(
        layout: &StorageLayout,
        embedder: &'a dyn Embedder,
        batch_size: usize,
        progress: ProgressBar,
    ) -> Result<Self, BuildError> {
        Ok(Self {
            embedder,
            batch_size: batch_size.max(1),
            meta: MetaWriter::create(&layout.meta_log_tmp(), &layout.meta_idx_tmp())?,
            index: None,
            staged: Vec::new(),
            pending: Vec::new(),
            embedded: 0,
            progress,
        })
    }

    /// Queue a record whose vector is already computed.
    pub fn push_vector(&mut self, vector: Vec<f32>, record: Chunk) -> Result<(), BuildError> {
        if !self.pending.is_empty() {
            self.flush_pending()?;
        }
        self.staged.push((vector, record));
        if self.staged.len() >= self.batch_size {
            self.flush_staged()?;
        }
        Ok(())
    }

    /// Queue a chunk that still needs an embedding.
    pub fn push_chunk(&mut self, chunk: Chunk) -> Result<(), BuildError> {
        if !self.staged.is_empty() {
            self.flush_staged()?;
        }
        self.pending.push(chunk);
        if self.pending.len() >= self.batch_size {
            self.flush_pending()?;
        }
        Ok(())
    }

    /// Flush both queues and close the metadata files.
    pub fn finish(mut self) -> Result<WrittenSlots, BuildError> {
        self.flush_staged()?;
        self.flush_pending()?;
        self.progress.finish_and_clear();

        let total = self.meta.finish()?;
        Ok(WrittenSlots {
            index: self.index,
            total,
            embedded: self.embedded,
        })
    }

    fn flush_staged(&mut self) -> Result<(), BuildError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let (vectors, records): (Vec<_>, Vec<_>) = std::mem::take(&mut self.staged).into_iter().unzip();
        self.write_batch(&vectors, &records)
    }

    fn flush_pending(&mut self) -> Result<(), BuildError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(&mut self.pending);
        let texts: Vec<String> = records.iter().map(|c| c.text.clone()).collect();

        let vectors = self.embedder.embed_batch(&texts)?;
        if vectors.len() != records.len() {
            return Err(BuildError::EmbeddingCount {
                expected: records.len(),
                got: vectors.len(),
            });
        }

        self.embedded += records.len();
        self.write_batch(&vectors, &records)
    }

    fn write_batch(&mut self, vectors: &[Vec<f32>], records: &[Chunk]) -> Result<(), BuildError> {
        // dimensionality comes from the first batch
        let dimensions = vectors.first().map(Vec::len).unwrap_or_default();
        let index = self
            .index
            .get_or_insert_with(|| VectorIndex::new(dimensions));

        index.add(vectors)?;
        for record in records {
            self.meta.append(record)?;
        }

        self.progress.inc(records.len() as u64);
        Ok(())
    }
}

/// Outcome of a [`SlotWriter`] pass.
pub struct WrittenSlots {
    /// `None` when nothing was written
    pub index: Option<VectorIndex>,
    pub total: usize,
    /// Slots whose vectors were computed during this pass
    pub embedded: usize,
}

impl WrittenSlots {
    /// Make the written pass the live index: stage the vector file, swap the
    /// metadata files in, then swap the vector file in.
    ///
    /// The staged vector file carries the fingerprint of the new metadata, so
    /// an interruption between the swaps leaves a pair that refuses to load
    /// instead of one whose slots disagree.
    pub fn commit(self, layout: &StorageLayout, model_id: &[u8; 32]) -> Result<VectorIndex, BuildError> {
        let index = match self.index {
            Some(index) if self.total > 0 => index,
            _ => return Err(BuildError::NoChunks),
        };

        let fingerprint = meta_store::fingerprint(&layout.meta_log_tmp(), &layout.meta_idx_tmp())?;
        let storage = VectorStorage::new(layout.vectors());
        storage.stage(&index, model_id, fingerprint)?;
        layout.commit_metadata()?;
        storage.commit()?;

        Ok(index)
    }
}

/// Cold build of a fresh index from a sequence of chunks.
pub struct IndexBuilder<'a> {
    embedder: &'a dyn Embedder,
    layout: &'a StorageLayout,
    batch_size: usize,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(embedder: &'a dyn Embedder, layout: &'a StorageLayout, batch_size: usize) -> Self {
        Self {
            embedder,
            layout,
            batch_size,
        }
    }

    /// Embed and store every chunk, replacing whatever index the layout held.
    pub fn build(&self, chunks: Vec<Chunk>) -> Result<VectorIndex, BuildError> {
        if chunks.is_empty() {
            return Err(BuildError::NoChunks);
        }

        let result = self.write_all(chunks);
        if result.is_err() {
            self.layout.discard_temp();
        }
        result
    }

    fn write_all(&self, chunks: Vec<Chunk>) -> Result<VectorIndex, BuildError> {
        let progress = progress_bar(chunks.len() as u64);
        let mut writer = SlotWriter::create(self.layout, self.embedder, self.batch_size, progress)?;

        for chunk in chunks {
            writer.push_chunk(chunk)?;
        }

        let written = writer.finish()?;
        log::info!("built index with {} slots", written.total);
        written.commit(self.layout, &self.embedder.model_id_hash())
    }
}

pub fn progress_bar(len: u64) -> ProgressBar {
    let style = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} chunks")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    ProgressBar::new(len).with_style(style).with_message("embedding")
}
