//! Application state: one embedder handle and at most one open index.
//!
//! Commands go through [`App`], which loads the committed index on first use,
//! builds it when none exists, and swaps in the result of every reindex.

pub mod factory;

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::Config;
use crate::rag::chunking::ChunkParams;
use crate::rag::embeddings::Embedder;
use crate::rag::index::{LoadOutcome, RagIndex};
use crate::rag::meta_store::MetaStore;
use crate::rag::rebuild::{IncrementalRebuilder, RebuildError, RebuildReport};
use crate::rag::retrieval::{retrieve, Hit};
use crate::rag::scanner::DocumentScanner;
use crate::storage::StorageLayout;

pub use factory::AppFactory;

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub notes_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub indexed: bool,
    pub slots: usize,
    pub documents: usize,
    pub sources: usize,
}

pub struct App {
    config: Config,
    embedder: Box<dyn Embedder>,
    layout: StorageLayout,
    scanner: DocumentScanner,
    params: ChunkParams,
    current: Option<RagIndex>,
}

impl App {
    pub fn new(config: Config, embedder: Box<dyn Embedder>) -> Result<Self> {
        let params = config.chunk_params()?;
        let layout = StorageLayout::new(config.storage_dir())
            .with_context(|| format!("Failed to create {}", config.storage_dir().display()))?;
        let scanner = DocumentScanner::new(
            config.notes_dir(),
            config.indexing.hash_len,
            config.indexing.hash_file_name,
        );

        Ok(Self {
            config,
            embedder,
            layout,
            scanner,
            params,
            current: None,
        })
    }

    /// The open index, loading it from disk or building it on first use.
    pub fn index(&mut self) -> Result<&mut RagIndex> {
        if self.current.is_none() {
            let index = match self.load()? {
                Some(index) => index,
                None => {
                    log::info!("building index from {}", self.scanner.root().display());
                    self.rebuild(true)?;
                    self.reopen()?
                }
            };
            self.current = Some(index);
        }

        self.current.as_mut().context("index is not open")
    }

    /// Bring the index in line with the notes directory.
    ///
    /// Incremental by default; `full` re-embeds the whole corpus.
    pub fn reindex(&mut self, full: bool) -> Result<RebuildReport> {
        let report = self.rebuild(full)?;
        self.current = Some(self.reopen()?);
        Ok(report)
    }

    pub fn search(&mut self, query: &str, top_k: Option<usize>, min_score: Option<f32>) -> Result<Vec<Hit>> {
        let span = tracing::info_span!("search", query);
        let _enter = span.enter();

        let top_k = top_k.unwrap_or(self.config.retrieval.top_k);
        let min_score = min_score.unwrap_or(self.config.retrieval.min_score);

        self.index()?;
        let index = self.current.as_mut().context("index is not open")?;

        Ok(retrieve(self.embedder.as_ref(), index, query, top_k, min_score)?)
    }

    /// Distinct sources in the open index.
    pub fn sources(&mut self) -> Result<Vec<String>> {
        let index = self.index()?;
        Ok(index.meta.list_sources()?.to_vec())
    }

    /// Index summary. Does not build a missing index.
    pub fn status(&mut self) -> Result<Status> {
        if self.current.is_none() {
            self.current = self.load()?;
        }

        let mut status = Status {
            notes_dir: self.scanner.root().to_path_buf(),
            storage_dir: self.layout.dir().to_path_buf(),
            model: self.embedder.name().to_string(),
            chunk_size: self.params.chunk_size(),
            chunk_overlap: self.params.overlap(),
            indexed: false,
            slots: 0,
            documents: 0,
            sources: 0,
        };

        if let Some(index) = self.current.as_mut() {
            status.indexed = true;
            status.slots = index.len();
            status.documents = index.meta.all_document_ids()?.len();
            status.sources = index.meta.list_sources()?.len();
        }

        Ok(status)
    }

    fn load(&self) -> Result<Option<RagIndex>> {
        let outcome = RagIndex::load(&self.layout, &self.embedder.model_id_hash())
            .context("Stored index is damaged, run `rag-notes reindex --full` to rebuild it")?;

        Ok(match outcome {
            LoadOutcome::Found(index) => Some(index),
            LoadOutcome::NotFound => None,
        })
    }

    /// Run a rebuild pass. The open index is closed first so the pass can
    /// replace its files.
    fn rebuild(&mut self, full: bool) -> Result<RebuildReport> {
        let span = tracing::info_span!("reindex", full);
        let _enter = span.enter();

        let old_ids = self.previous_ids();
        self.current = None;

        let rebuilder = IncrementalRebuilder::new(
            self.embedder.as_ref(),
            &self.layout,
            &self.scanner,
            self.params,
            self.config.indexing.batch_size,
        );

        let result = if full {
            rebuilder.full_build()
        } else {
            let classification = self.scanner.classify(&old_ids)?;
            log::info!(
                "{} changed documents, {} unchanged",
                classification.changed.len(),
                classification.unchanged.len()
            );
            rebuilder.rebuild(&classification.changed, &classification.unchanged)
        };

        match result {
            Ok((_, report)) => Ok(report),
            Err(RebuildError::NoContent) => anyhow::bail!(
                "No indexable notes found in {}",
                self.scanner.root().display()
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn reopen(&self) -> Result<RagIndex> {
        match self.load()? {
            Some(index) => Ok(index),
            None => anyhow::bail!("index missing after rebuild in {}", self.layout.dir().display()),
        }
    }

    /// Document ids of the stored index; empty when it cannot be read.
    fn previous_ids(&mut self) -> HashSet<String> {
        let ids = match self.current.as_mut() {
            Some(index) => index.meta.all_document_ids(),
            None => MetaStore::open(&self.layout.meta_log(), &self.layout.meta_idx())
                .and_then(|mut meta| meta.all_document_ids()),
        };

        ids.unwrap_or_else(|e| {
            log::debug!("no usable previous document ids: {e}");
            HashSet::new()
        })
    }
}
