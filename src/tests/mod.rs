//! Cross-module index tests and shared test doubles.


use std::cell::RefCell;
use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::rag::embeddings::{normalize, Embedder, EmbeddingError};

/// Deterministic embedder for tests.
///
/// Texts registered with [`MockEmbedder::with_vector`] map to their fixed
/// vector; any other text maps to a normalized vector derived from its
/// SHA256, so equal texts always embed identically. Every text it is asked
/// to embed is recorded.
pub struct MockEmbedder {
    name: String,
    dimensions: usize,
    fixed: HashMap<String, Vec<f32>>,
    fail_on: Option<String>,
    drop_last: bool,
    calls: RefCell<Vec<String>>,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self::named("mock-embedder", dimensions)
    }

    pub fn named(name: &str, dimensions: usize) -> Self {
        Self {
            name: name.to_string(),
            dimensions,
            fixed: HashMap::new(),
            fail_on: None,
            drop_last: false,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimensions);
        self.fixed.insert(text.to_string(), vector);
        self
    }

    /// Return one vector fewer than requested.
    pub fn dropping_last(mut self) -> Self {
        self.drop_last = true;
        self
    }

    /// Fail any batch that contains `text`.
    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }

    pub fn embedded_texts(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.fixed.get(text) {
            return vector.clone();
        }

        let digest = Sha256::digest(text.as_bytes());
        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|i| digest[i % digest.len()] as f32 + 1.0)
            .collect();
        normalize(&mut vector);
        vector
    }
}

impl Embedder for MockEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Some(bad) = &self.fail_on {
            if texts.iter().any(|t| t == bad) {
                return Err(EmbeddingError::EmbeddingFailed(format!("refusing '{bad}'")));
            }
        }

        self.calls.borrow_mut().extend(texts.iter().cloned());

        let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.vector_for(t)).collect();
        if self.drop_last {
            vectors.pop();
        }
        Ok(vectors)
    }
}

/// Write `files` (relative path, content) under `root`.
pub fn write_notes(root: &std::path::Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
}
