use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::rag::builder::DEFAULT_BATCH_SIZE;
use crate::rag::chunking::{ChunkError, ChunkParams};
use crate::rag::DEFAULT_MODEL;
use crate::storage;

pub const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CHUNK_SIZE: i64 = 1000;
const DEFAULT_CHUNK_OVERLAP: i64 = 200;
const DEFAULT_TOP_K: usize = 5;
const MAX_TOP_K: usize = 50;
const DEFAULT_MIN_SCORE: f32 = 0.2;
const DEFAULT_HASH_LEN: usize = 16;
const HASH_LEN_RANGE: std::ops::RangeInclusive<usize> = 8..=64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid chunking settings: {0}")]
    Chunking(#[from] ChunkError),

    #[error("{0}")]
    Invalid(String),
}

/// Embedding model settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: i64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum similarity [0.0, 1.0] for a chunk to be returned
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Chunks per embedding call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Hex characters kept from a document hash
    #[serde(default = "default_hash_len")]
    pub hash_len: usize,

    /// Mix the file name into the document id
    #[serde(default)]
    pub hash_file_name: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            hash_len: DEFAULT_HASH_LEN,
            hash_file_name: false,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_chunk_size() -> i64 {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> i64 {
    DEFAULT_CHUNK_OVERLAP
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_min_score() -> f32 {
    DEFAULT_MIN_SCORE
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_hash_len() -> usize {
    DEFAULT_HASH_LEN
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the notes to index. Defaults to `<base>/notes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_dir: Option<PathBuf>,

    /// Directory holding the index files. Defaults to `<base>/storage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        self.chunk_params()?;

        let retrieval = &self.retrieval;
        if !(1..=MAX_TOP_K).contains(&retrieval.top_k) {
            return Err(ConfigError::Invalid(format!(
                "retrieval.top_k must be between 1 and {MAX_TOP_K}, got {}",
                retrieval.top_k
            )));
        }
        if !(0.0..=1.0).contains(&retrieval.min_score) {
            return Err(ConfigError::Invalid(format!(
                "retrieval.min_score must be between 0.0 and 1.0, got {}",
                retrieval.min_score
            )));
        }

        let indexing = &self.indexing;
        if indexing.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "indexing.batch_size must be greater than 0".to_string(),
            ));
        }
        if !HASH_LEN_RANGE.contains(&indexing.hash_len) {
            return Err(ConfigError::Invalid(format!(
                "indexing.hash_len must be between {} and {}, got {}",
                HASH_LEN_RANGE.start(),
                HASH_LEN_RANGE.end(),
                indexing.hash_len
            )));
        }

        if self.embedding.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "embedding.download_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            let defaults = serde_yml::to_string(&Self::default())?;
            storage::write_atomic(&path, defaults.as_bytes()).map_err(|e| ConfigError::io(&path, e))?;
        }

        let config_str = std::fs::read_to_string(&path).map_err(|e| ConfigError::io(&path, e))?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            log::info!("upgrading {}", path.display());
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self)?;
        storage::write_atomic(&path, config_str.as_bytes()).map_err(|e| ConfigError::io(&path, e))
    }

    pub fn chunk_params(&self) -> Result<ChunkParams, ChunkError> {
        ChunkParams::new(self.chunking.chunk_size, self.chunking.chunk_overlap)
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.resolve(self.notes_dir.as_deref(), "notes")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.resolve(self.storage_dir.as_deref(), "storage")
    }

    fn resolve(&self, configured: Option<&Path>, default_name: &str) -> PathBuf {
        match configured {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.base_path.join(dir),
            None => self.base_path.join(default_name),
        }
    }
}

impl ConfigError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
