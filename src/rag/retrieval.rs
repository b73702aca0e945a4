//! Query-time lookup: embed the query, search the vector index, resolve
//! matching slots to their metadata records.

use serde::Serialize;

use crate::rag::embeddings::{Embedder, EmbeddingError};
use crate::rag::index::RagIndex;
use crate::rag::meta_store::MetaStoreError;
use crate::rag::vector_index::IndexError;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("metadata error: {0}")]
    Meta(#[from] MetaStoreError),
}

/// A retrieved chunk together with its similarity to the query.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Hit {
    pub document_id: String,
    pub source: String,
    pub chunk_sequence: u32,
    pub text: String,
    pub score: f32,
}

/// Up to `top_k` chunks whose score is at least `min_score`, best first.
///
/// Rows the engine reports without a match are skipped. Equal scores keep the
/// order the engine returned them in.
pub fn retrieve(
    embedder: &dyn Embedder,
    index: &mut RagIndex,
    query: &str,
    top_k: usize,
    min_score: f32,
) -> Result<Vec<Hit>, RetrievalError> {
    if top_k == 0 || index.is_empty() {
        return Ok(vec![]);
    }

    let query_vector = embedder.embed(query)?;
    let neighbors = index.vectors.search(&query_vector, top_k)?;

    let mut hits = Vec::with_capacity(neighbors.len());
    for neighbor in neighbors {
        if neighbor.position < 0 || neighbor.score < min_score {
            continue;
        }

        let record = index.meta.get(neighbor.position as usize)?;
        hits.push(Hit {
            document_id: record.document_id,
            source: record.source,
            chunk_sequence: record.chunk_sequence,
            text: record.text,
            score: neighbor.score,
        });
    }

    log::debug!("query '{query}' matched {} chunks", hits.len());
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::builder::IndexBuilder;
    use crate::rag::chunking::Chunk;
    use crate::storage::StorageLayout;
    use crate::tests::MockEmbedder;

    #[test]
    fn test_zero_top_k_returns_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path()).unwrap();
        let embedder = MockEmbedder::new(4);
        let vectors = IndexBuilder::new(&embedder, &layout, 4)
            .build(vec![Chunk::new("d", 0, "a.md", "alpha")])
            .unwrap();
        let mut index = RagIndex::open_with(&layout, vectors).unwrap();

        let hits = retrieve(&embedder, &mut index, "alpha", 0, 0.0).unwrap();

        assert!(hits.is_empty());
        // only the build pass reached the embedder
        assert_eq!(embedder.embedded_texts(), vec!["alpha"]);
    }

    #[test]
    fn test_exact_text_scores_one() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path()).unwrap();
        let embedder = MockEmbedder::new(8);
        let vectors = IndexBuilder::new(&embedder, &layout, 4)
            .build(vec![
                Chunk::new("d1", 0, "a.md", "alpha"),
                Chunk::new("d2", 0, "b.md", "beta"),
            ])
            .unwrap();
        let mut index = RagIndex::open_with(&layout, vectors).unwrap();

        let hits = retrieve(&embedder, &mut index, "beta", 1, 0.0).unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "b.md");
        assert_eq!(hits[0].document_id, "d2");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }
}
