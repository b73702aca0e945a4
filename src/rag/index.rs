//! A committed index: vector file plus metadata files, opened together.

use crate::rag::meta_store::{MetaStore, MetaStoreError};
use crate::rag::vector_index::VectorIndex;
use crate::rag::vector_storage::{VectorStorage, VectorStorageError};
use crate::storage::StorageLayout;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("metadata error: {0}")]
    Meta(#[from] MetaStoreError),

    #[error("vector storage error: {0}")]
    Vectors(#[from] VectorStorageError),

    #[error("index is misaligned: {records} metadata records but {vectors} vectors")]
    Misaligned { records: usize, vectors: usize },
}

/// Either a usable index or the signal that one has to be built.
pub enum LoadOutcome {
    Found(RagIndex),
    NotFound,
}

/// Vector index and metadata store whose slots line up one to one.
pub struct RagIndex {
    pub vectors: VectorIndex,
    pub meta: MetaStore,
}

impl RagIndex {
    /// Load the committed index in `layout`.
    ///
    /// Missing files, vectors written by a different model and vectors left
    /// over from another commit come back as [`LoadOutcome::NotFound`];
    /// damaged files are errors.
    pub fn load(layout: &StorageLayout, model_id: &[u8; 32]) -> Result<LoadOutcome, LoadError> {
        if !layout.is_complete() {
            log::info!("no index found in {}", layout.dir().display());
            return Ok(LoadOutcome::NotFound);
        }

        let mut meta = match MetaStore::open(&layout.meta_log(), &layout.meta_idx()) {
            Ok(meta) => meta,
            Err(MetaStoreError::Missing(_)) => return Ok(LoadOutcome::NotFound),
            Err(e) => return Err(e.into()),
        };
        let fingerprint = meta.fingerprint()?;

        let vectors = match VectorStorage::new(layout.vectors()).load(model_id, fingerprint) {
            Ok(vectors) => vectors,
            Err(VectorStorageError::ModelMismatch) => {
                log::warn!("stored vectors were produced by a different model, index needs a rebuild");
                return Ok(LoadOutcome::NotFound);
            }
            Err(VectorStorageError::MetadataMismatch) => {
                log::warn!("stored vectors do not match the metadata files, index needs a rebuild");
                return Ok(LoadOutcome::NotFound);
            }
            Err(VectorStorageError::Missing(_)) => return Ok(LoadOutcome::NotFound),
            Err(e) => return Err(e.into()),
        };

        let index = Self::pair(vectors, meta)?;
        log::info!("loaded index with {} slots", index.len());
        Ok(LoadOutcome::Found(index))
    }

    /// Attach freshly opened metadata to an in-memory vector index.
    pub fn open_with(layout: &StorageLayout, vectors: VectorIndex) -> Result<Self, LoadError> {
        let meta = MetaStore::open(&layout.meta_log(), &layout.meta_idx())?;
        Self::pair(vectors, meta)
    }

    fn pair(vectors: VectorIndex, meta: MetaStore) -> Result<Self, LoadError> {
        if meta.len() != vectors.len() {
            return Err(LoadError::Misaligned {
                records: meta.len(),
                vectors: vectors.len(),
            });
        }
        Ok(Self { vectors, meta })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::builder::IndexBuilder;
    use crate::rag::chunking::Chunk;
    use crate::rag::embeddings::Embedder;
    use crate::tests::MockEmbedder;

    fn build(layout: &StorageLayout, embedder: &MockEmbedder) {
        IndexBuilder::new(embedder, layout, 4)
            .build(vec![
                Chunk::new("d1", 0, "note.md", "test0"),
                Chunk::new("d1", 1, "note.md", "test1"),
            ])
            .unwrap();
    }

    #[test]
    fn test_empty_dir_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path()).unwrap();

        let outcome = RagIndex::load(&layout, &[0u8; 32]).unwrap();
        assert!(matches!(outcome, LoadOutcome::NotFound));
    }

    #[test]
    fn test_load_after_build() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path()).unwrap();
        let embedder = MockEmbedder::new(4);
        build(&layout, &embedder);

        match RagIndex::load(&layout, &embedder.model_id_hash()).unwrap() {
            LoadOutcome::Found(mut index) => {
                assert_eq!(index.len(), 2);
                assert_eq!(index.vectors.len(), 2);
                assert_eq!(index.meta.get(1).unwrap().text, "test1");
            }
            LoadOutcome::NotFound => panic!("index should load"),
        }
    }

    #[test]
    fn test_other_model_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path()).unwrap();
        build(&layout, &MockEmbedder::new(4));

        let other = MockEmbedder::named("other-model", 4);
        let outcome = RagIndex::load(&layout, &other.model_id_hash()).unwrap();
        assert!(matches!(outcome, LoadOutcome::NotFound));
    }

    #[test]
    fn test_truncated_offset_index_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path()).unwrap();
        let embedder = MockEmbedder::new(4);
        build(&layout, &embedder);

        let bytes = std::fs::read(layout.meta_idx()).unwrap();
        std::fs::write(layout.meta_idx(), &bytes[..8]).unwrap();

        let outcome = RagIndex::load(&layout, &embedder.model_id_hash()).unwrap();
        assert!(matches!(outcome, LoadOutcome::NotFound));
    }

    #[test]
    fn test_metadata_from_newer_commit_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path()).unwrap();
        let embedder = MockEmbedder::new(4);
        build(&layout, &embedder);
        let old_vectors = std::fs::read(layout.vectors()).unwrap();

        // same slot count, different records
        IndexBuilder::new(&embedder, &layout, 4)
            .build(vec![
                Chunk::new("d2", 0, "other.md", "test1"),
                Chunk::new("d2", 1, "other.md", "test0"),
            ])
            .unwrap();
        std::fs::write(layout.vectors(), old_vectors).unwrap();

        let outcome = RagIndex::load(&layout, &embedder.model_id_hash()).unwrap();
        assert!(matches!(outcome, LoadOutcome::NotFound));
    }

    #[test]
    fn test_open_with_rejects_length_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path()).unwrap();
        build(&layout, &MockEmbedder::new(4));

        let mut vectors = VectorIndex::new(4);
        vectors.add(&[vec![1.0, 0.0, 0.0, 0.0]]).unwrap();

        let result = RagIndex::open_with(&layout, vectors);
        assert!(matches!(
            result,
            Err(LoadError::Misaligned {
                records: 2,
                vectors: 1
            })
        ));
    }
}
