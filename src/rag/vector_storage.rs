//! Binary storage for the vector index.
//!
//! File format: vectors.bin
//!
//! Header (53 bytes):
//! - version: u8 (2)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u32 (little-endian)
//! - entry_count: u64 (little-endian)
//! - meta_fingerprint: u32 (little-endian, see [`crate::rag::meta_store::fingerprint`])
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Body:
//! - entry_count vectors of `dimensions` f32 values (little-endian), in
//!   position order

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::rag::vector_index::VectorIndex;
use crate::storage::temp_sibling;

/// Current file format version
const FORMAT_VERSION: u8 = 2;

/// Header size in bytes: version(1) + model_id(32) + dimensions(4) + entry_count(8)
/// + meta_fingerprint(4) + checksum(4)
const HEADER_SIZE: usize = 53;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vector file not found: {0}")]
    Missing(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Metadata mismatch: file was written with other metadata files")]
    MetadataMismatch,
}

impl VectorStorageError {
    /// The file is absent, damaged, or was written for another model or
    /// another set of metadata files; the vectors in it cannot be reused.
    pub fn is_stale(&self) -> bool {
        !matches!(self, VectorStorageError::Io(_))
    }
}

/// Storage manager for the vector index file.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the vector index from storage.
    ///
    /// # Arguments
    /// * `expected_model_id` - SHA256 hash of the expected model name
    /// * `expected_meta` - fingerprint of the live metadata files
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_meta: u32,
    ) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                VectorStorageError::Missing(self.path.display().to_string())
            }
            _ => VectorStorageError::Io(e),
        })?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        if header.meta_fingerprint != expected_meta {
            return Err(VectorStorageError::MetadataMismatch);
        }

        let dimensions = header.dimensions as usize;
        let count = header.entry_count as usize;
        let mut index = VectorIndex::with_capacity(dimensions, count);

        let mut vector = vec![0f32; dimensions];
        let mut float_bytes = [0u8; 4];
        for position in 0..count {
            for value in vector.iter_mut() {
                reader.read_exact(&mut float_bytes).map_err(|e| truncated(e, position))?;
                *value = f32::from_le_bytes(float_bytes);
            }
            index
                .add(std::slice::from_ref(&vector))
                .map_err(|e| VectorStorageError::InvalidFormat(e.to_string()))?;
        }

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(VectorStorageError::InvalidFormat(format!(
                "trailing data after {count} vectors"
            )));
        }

        Ok(index)
    }

    /// Write the index to the temp sibling of the storage path without
    /// touching the live file. Finish with [`VectorStorage::commit`].
    ///
    /// `meta_fingerprint` identifies the metadata files committed alongside.
    pub fn stage(
        &self,
        index: &VectorIndex,
        model_id: &[u8; 32],
        meta_fingerprint: u32,
    ) -> Result<(), VectorStorageError> {
        let temp_path = self.temp_path();

        let result = write_to_file(&temp_path, index, model_id, meta_fingerprint);
        if result.is_err() {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
        }
        result
    }

    /// Move a staged file over the live one.
    pub fn commit(&self) -> Result<(), VectorStorageError> {
        std::fs::rename(self.temp_path(), &self.path)?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        temp_sibling(&self.path)
    }
}

fn truncated(e: std::io::Error, position: usize) -> VectorStorageError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            VectorStorageError::InvalidFormat(format!("file ends inside vector {position}"))
        }
        _ => VectorStorageError::Io(e),
    }
}

fn write_to_file(
    path: &Path,
    index: &VectorIndex,
    model_id: &[u8; 32],
    meta_fingerprint: u32,
) -> Result<(), VectorStorageError> {
    let dimensions = u32::try_from(index.dimensions())
        .map_err(|_| VectorStorageError::InvalidFormat("too many dimensions".to_string()))?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write_header(
        &mut writer,
        &Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions,
            entry_count: index.len() as u64,
            meta_fingerprint,
        },
    )?;

    for &value in index.as_slice() {
        writer.write_all(&value.to_le_bytes())?;
    }

    // Flush and sync
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| VectorStorageError::Io(e.into_error()))?;
    file.sync_all()?;

    Ok(())
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            VectorStorageError::InvalidFormat("file shorter than header".to_string())
        }
        _ => VectorStorageError::Io(e),
    })?;

    let version = header_bytes[0];

    // Version check first
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    // Verify checksum (computed over header without checksum field)
    let stored_checksum = u32::from_le_bytes(le_array(&header_bytes[49..53]));
    if stored_checksum != crc32fast::hash(&header_bytes[0..49]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let header = Header {
        version,
        model_id,
        dimensions: u32::from_le_bytes(le_array(&header_bytes[33..37])),
        entry_count: u64::from_le_bytes(le_array(&header_bytes[37..45])),
        meta_fingerprint: u32::from_le_bytes(le_array(&header_bytes[45..49])),
    };

    if header.dimensions == 0 {
        return Err(VectorStorageError::InvalidFormat("zero dimensions".to_string()));
    }

    Ok(header)
}

fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = header.version;
    header_bytes[1..33].copy_from_slice(&header.model_id);
    header_bytes[33..37].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[37..45].copy_from_slice(&header.entry_count.to_le_bytes());
    header_bytes[45..49].copy_from_slice(&header.meta_fingerprint.to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[0..49]);
    header_bytes[49..53].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u32,
    entry_count: u64,
    meta_fingerprint: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    const META: u32 = 0x1234_5678;

    fn test_model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new(3);
        index
            .add(&[
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.1234567, -0.5, 0.75],
            ])
            .unwrap();
        index
    }

    fn save(storage: &VectorStorage, index: &VectorIndex, model_id: &[u8; 32]) {
        storage.stage(index, model_id, META).unwrap();
        storage.commit().unwrap();
    }

    #[test]
    fn test_save_and_load_preserves_positions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        let storage = VectorStorage::new(path.clone());
        let model_id = test_model_id();

        save(&storage, &sample_index(), &model_id);
        assert!(path.exists());
        assert!(!temp_sibling(&path).exists());

        let loaded = storage.load(&model_id, META).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.dimensions(), 3);
        assert_eq!(loaded.reconstruct(2).unwrap(), vec![0.1234567, -0.5, 0.75]);
    }

    #[test]
    fn test_header_size() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        save(&VectorStorage::new(path.clone()), &sample_index(), &test_model_id());

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 3 * 3 * 4);
        assert_eq!(bytes[0], FORMAT_VERSION);
    }

    #[test]
    fn test_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(tmp.path().join("vectors.bin"));

        let result = storage.load(&test_model_id(), META);
        assert!(matches!(result, Err(VectorStorageError::Missing(_))));
    }

    #[test]
    fn test_model_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(tmp.path().join("vectors.bin"));

        save(&storage, &sample_index(), &test_model_id());

        let mut wrong_model_id = [0u8; 32];
        wrong_model_id[0] = 0xFF;

        let result = storage.load(&wrong_model_id, META);
        assert!(matches!(result, Err(VectorStorageError::ModelMismatch)));
    }

    #[test]
    fn test_metadata_mismatch_is_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(tmp.path().join("vectors.bin"));

        save(&storage, &sample_index(), &test_model_id());

        let err = storage.load(&test_model_id(), META + 1).unwrap_err();
        assert!(matches!(err, VectorStorageError::MetadataMismatch));
        assert!(err.is_stale());
    }

    #[test]
    fn test_stage_leaves_live_file_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(tmp.path().join("vectors.bin"));
        let model_id = test_model_id();

        save(&storage, &sample_index(), &model_id);

        let mut bigger = sample_index();
        bigger.add(&[vec![0.0, 0.0, 1.0]]).unwrap();
        storage.stage(&bigger, &model_id, META + 1).unwrap();

        assert_eq!(storage.load(&model_id, META).unwrap().len(), 3);

        storage.commit().unwrap();
        assert_eq!(storage.load(&model_id, META + 1).unwrap().len(), 4);
    }

    #[test]
    fn test_atomic_write_cleans_up_on_error() {
        let path = PathBuf::from("/nonexistent/directory/vectors.bin");
        let storage = VectorStorage::new(path.clone());

        let result = storage.stage(&sample_index(), &test_model_id(), META);

        assert!(result.is_err());
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        let storage = VectorStorage::new(path.clone());
        let model_id = test_model_id();

        save(&storage, &sample_index(), &model_id);

        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let result = storage.load(&model_id, META);
        assert!(matches!(result, Err(VectorStorageError::ChecksumMismatch)));
    }

    #[test]
    fn test_truncated_body_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        let storage = VectorStorage::new(path.clone());
        let model_id = test_model_id();

        save(&storage, &sample_index(), &model_id);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let result = storage.load(&model_id, META);
        assert!(matches!(result, Err(VectorStorageError::InvalidFormat(_))));
        assert!(result.unwrap_err().is_stale());
    }
}
