use std::io::Write;
use std::path::{Path, PathBuf};

pub const META_LOG_FILE: &str = "meta.jsonl";
pub const META_IDX_FILE: &str = "meta.idx";
pub const VECTORS_FILE: &str = "vectors.bin";

const TEMP_SUFFIX: &str = "tmp";

/// File layout of an index storage directory.
///
/// Writers always produce the `*.tmp` siblings first; `commit_metadata`
/// renames them over the live files. A leftover temp file from an interrupted
/// run is simply truncated by the next writer.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    dir: PathBuf,
}

impl StorageLayout {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta_log(&self) -> PathBuf {
        self.dir.join(META_LOG_FILE)
    }

    pub fn meta_idx(&self) -> PathBuf {
        self.dir.join(META_IDX_FILE)
    }

    pub fn vectors(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    pub fn meta_log_tmp(&self) -> PathBuf {
        temp_sibling(&self.meta_log())
    }

    pub fn meta_idx_tmp(&self) -> PathBuf {
        temp_sibling(&self.meta_idx())
    }

    /// True when every file of a committed index is present.
    pub fn is_complete(&self) -> bool {
        self.meta_log().is_file() && self.meta_idx().is_file() && self.vectors().is_file()
    }

    /// Replace the live metadata files with the freshly written temp files.
    ///
    /// Each rename is atomic on its own. Readers must not hold the live files
    /// open while this runs.
    pub fn commit_metadata(&self) -> std::io::Result<()> {
        std::fs::rename(self.meta_idx_tmp(), self.meta_idx())?;
        std::fs::rename(self.meta_log_tmp(), self.meta_log())?;
        Ok(())
    }

    /// Remove temp files left behind by a failed pass.
    pub fn discard_temp(&self) {
        for path in [
            self.meta_log_tmp(),
            self.meta_idx_tmp(),
            temp_sibling(&self.vectors()),
        ] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    log::warn!("failed to remove {}: {e}", path.display());
                }
            }
        }
    }
}

pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Write a small file via temp file -> fsync -> rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_sibling(path);

    let result = (|| {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    std::fs::rename(&temp_path, path)
}
