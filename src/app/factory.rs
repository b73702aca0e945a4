use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use homedir::my_home;

use crate::app::App;
use crate::config::Config;
use crate::rag::embeddings::{Embedder, EmbeddingModel};

/// Application factory for resolving paths and wiring the embedder into an [`App`]
pub struct AppFactory;

impl AppFactory {
    /// Load config from `paths`, create the embedding model and the app.
    pub fn create_app(paths: &AppPaths) -> Result<App> {
        let config = Config::load_with(&paths.base_path).context("Failed to load configuration")?;
        let embedder = Self::create_embedder(&config, &paths.base_path)?;

        App::new(config, embedder)
    }

    /// Resolve application paths, creating the base directory.
    ///
    /// `base_dir` takes precedence over `RAG_NOTES_HOME`, which takes
    /// precedence over `~/.local/share/rag-notes`.
    pub fn get_paths(base_dir: Option<PathBuf>) -> Result<AppPaths> {
        let base_path = match base_dir {
            Some(dir) => dir,
            None => Self::get_base_path()?,
        };

        std::fs::create_dir_all(&base_path).context("Failed to create application base directory")?;

        Ok(AppPaths { base_path })
    }

    fn create_embedder(config: &Config, base_path: &Path) -> Result<Box<dyn Embedder>> {
        let timeout = Duration::from_secs(config.embedding.download_timeout_secs);
        let model = EmbeddingModel::new(&config.embedding.model, base_path.to_path_buf(), Some(timeout))
            .with_context(|| format!("Failed to load embedding model '{}'", config.embedding.model))?;

        log::info!(
            "embedding model '{}' ready ({} dimensions)",
            config.embedding.model,
            model.dimensions()
        );
        Ok(Box::new(model))
    }

    /// Get the base path for the application
    fn get_base_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("RAG_NOTES_HOME") {
            return Ok(PathBuf::from(path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/rag-notes"))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
}
