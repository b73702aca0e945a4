//! Chunk metadata log with a fixed-width offset index.
//!
//! File format:
//!
//! - `meta.jsonl`: one JSON-serialized [`Chunk`] per line, in slot order
//! - `meta.idx`: one `u64` (little-endian) per slot, the byte offset of that
//!   slot's line inside `meta.jsonl`
//!
//! The slot of a record is also the position of its vector in the vector
//! index, so both files are only ever written in the same order as the
//! vectors.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::rag::chunking::Chunk;

/// Width of one offset index entry in bytes.
pub const OFFSET_WIDTH: u64 = 8;

const HASH_BLOCK: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("metadata files not found in {0}")]
    Missing(String),

    #[error("metadata is corrupt: {0}")]
    Corrupt(String),

    #[error("slot {slot} is out of range for an index of {len} slots")]
    OutOfRange { slot: usize, len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl MetaStoreError {
    /// Missing or unreadable backing files, as opposed to misuse or I/O trouble.
    pub fn is_unreadable(&self) -> bool {
        matches!(self, MetaStoreError::Missing(_) | MetaStoreError::Corrupt(_))
    }
}

/// Read-only random access to stored chunk records.
///
/// Holds both files open for its lifetime. Drop it before anything replaces
/// the backing files and open a fresh instance afterwards.
pub struct MetaStore {
    log: BufReader<File>,
    idx: File,
    len: usize,
    sources: Option<Vec<String>>,
}

impl MetaStore {
    pub fn open(log_path: &Path, idx_path: &Path) -> Result<Self, MetaStoreError> {
        let log = open_existing(log_path)?;
        let idx = open_existing(idx_path)?;

        let idx_bytes = idx.metadata()?.len();
        if idx_bytes % OFFSET_WIDTH != 0 {
            return Err(MetaStoreError::Corrupt(format!(
                "{} is {idx_bytes} bytes, not a multiple of {OFFSET_WIDTH}",
                idx_path.display()
            )));
        }

        Ok(Self {
            log: BufReader::new(log),
            idx,
            len: (idx_bytes / OFFSET_WIDTH) as usize,
            sources: None,
        })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fetch the record stored at `slot`.
    pub fn get(&mut self, slot: usize) -> Result<Chunk, MetaStoreError> {
        if slot >= self.len {
            return Err(MetaStoreError::OutOfRange {
                slot,
                len: self.len,
            });
        }

        let mut offset_bytes = [0u8; OFFSET_WIDTH as usize];
        self.idx.seek(SeekFrom::Start(slot as u64 * OFFSET_WIDTH))?;
        self.idx.read_exact(&mut offset_bytes)?;
        let offset = u64::from_le_bytes(offset_bytes);

        self.log.seek(SeekFrom::Start(offset))?;
        let mut line = String::new();
        if self.log.read_line(&mut line)? == 0 {
            return Err(MetaStoreError::Corrupt(format!(
                "slot {slot} points past the end of the log (offset {offset})"
            )));
        }

        parse_record(&line).map_err(|e| MetaStoreError::Corrupt(format!("slot {slot}: {e}")))
    }

    /// CRC32 of the offset index followed by the log, see [`fingerprint`].
    pub fn fingerprint(&mut self) -> Result<u32, MetaStoreError> {
        self.idx.seek(SeekFrom::Start(0))?;
        self.log.seek(SeekFrom::Start(0))?;
        hash_pair(&mut self.idx, &mut self.log)
    }

    /// Sorted, de-duplicated list of indexed sources. Computed once per
    /// instance.
    pub fn list_sources(&mut self) -> Result<&[String], MetaStoreError> {
        if self.sources.is_none() {
            let mut sources = Vec::new();
            self.scan(|record| sources.push(record.source))?;
            sources.sort();
            sources.dedup();
            self.sources = Some(sources);
        }

        Ok(self.sources.as_deref().unwrap_or_default())
    }

    /// Every document id present in the log.
    pub fn all_document_ids(&mut self) -> Result<HashSet<String>, MetaStoreError> {
        let mut ids = HashSet::new();
        self.scan(|record| {
            ids.insert(record.document_id);
        })?;
        Ok(ids)
    }

    /// Visit every record in log order.
    fn scan(&mut self, mut visit: impl FnMut(Chunk)) -> Result<(), MetaStoreError> {
        self.log.seek(SeekFrom::Start(0))?;

        let mut line = String::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            if self.log.read_line(&mut line)? == 0 {
                break;
            }
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_record(&line)
                .map_err(|e| MetaStoreError::Corrupt(format!("line {line_no}: {e}")))?;
            visit(record);
        }

        Ok(())
    }
}

fn open_existing(path: &Path) -> Result<File, MetaStoreError> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MetaStoreError::Missing(path.display().to_string()),
        _ => MetaStoreError::Io(e),
    })
}

/// CRC32 over the bytes of `idx_path` followed by those of `log_path`.
///
/// The vector file records this value for the metadata it was committed
/// with, so vectors are never paired with records from another pass.
pub fn fingerprint(log_path: &Path, idx_path: &Path) -> Result<u32, MetaStoreError> {
    let mut log = open_existing(log_path)?;
    let mut idx = open_existing(idx_path)?;
    hash_pair(&mut idx, &mut log)
}

fn hash_pair(idx: &mut impl Read, log: &mut impl Read) -> Result<u32, MetaStoreError> {
    let mut hasher = crc32fast::Hasher::new();
    let mut block = vec![0u8; HASH_BLOCK];
    for reader in [idx as &mut dyn Read, log as &mut dyn Read] {
        loop {
            let n = reader.read(&mut block)?;
            if n == 0 {
                break;
            }
            hasher.update(&block[..n]);
        }
    }
    Ok(hasher.finalize())
}

fn parse_record(line: &str) -> Result<Chunk, serde_json::Error> {
    serde_json::from_str(line.trim_end_matches(['\n', '\r']))
}

/// Appends records to a fresh log/offset pair.
pub struct MetaWriter {
    log: BufWriter<File>,
    idx: BufWriter<File>,
    offset: u64,
    count: usize,
}

impl MetaWriter {
    /// Create (or truncate) the given files.
    pub fn create(log_path: &Path, idx_path: &Path) -> Result<Self, MetaStoreError> {
        Ok(Self {
            log: BufWriter::new(File::create(log_path)?),
            idx: BufWriter::new(File::create(idx_path)?),
            offset: 0,
            count: 0,
        })
    }

    pub fn append(&mut self, record: &Chunk) -> Result<(), MetaStoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        self.idx.write_all(&self.offset.to_le_bytes())?;
        self.log.write_all(&line)?;

        self.offset += line.len() as u64;
        self.count += 1;
        Ok(())
    }

    /// Flush and fsync both files. Returns the number of records written.
    pub fn finish(self) -> Result<usize, MetaStoreError> {
        for writer in [self.log, self.idx] {
            let file = writer
                .into_inner()
                .map_err(|e| MetaStoreError::Io(e.into_error()))?;
            file.sync_all()?;
        }
        Ok(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_store(dir: &Path, records: &[Chunk]) -> (std::path::PathBuf, std::path::PathBuf) {
        let log_path = dir.join("meta.jsonl");
        let idx_path = dir.join("meta.idx");
        let mut writer = MetaWriter::create(&log_path, &idx_path).unwrap();
        for record in records {
            writer.append(record).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), records.len());
        (log_path, idx_path)
    }

    fn records() -> Vec<Chunk> {
        vec![
            Chunk::new("d1", 0, "note.md", "test0"),
            Chunk::new("d1", 1, "note.md", "test1"),
            Chunk::new("d2", 0, "b.md", "naïve \"quoted\"\ntext"),
        ]
    }

    #[test]
    fn test_get_returns_written_records() {
        let tmp = tempfile::tempdir().unwrap();
        let records = records();
        let (log, idx) = write_store(tmp.path(), &records);

        let mut store = MetaStore::open(&log, &idx).unwrap();
        assert_eq!(store.len(), 3);

        // out of order access exercises the offset index
        assert_eq!(store.get(2).unwrap(), records[2]);
        assert_eq!(store.get(0).unwrap(), records[0]);
        assert_eq!(store.get(1).unwrap(), records[1]);
    }

    #[test]
    fn test_offset_index_width() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, idx) = write_store(tmp.path(), &records());

        assert_eq!(std::fs::metadata(idx).unwrap().len(), 3 * OFFSET_WIDTH);
    }

    #[test]
    fn test_out_of_range_is_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let (log, idx) = write_store(tmp.path(), &records());

        let mut store = MetaStore::open(&log, &idx).unwrap();
        let err = store.get(3).unwrap_err();
        assert!(matches!(err, MetaStoreError::OutOfRange { slot: 3, len: 3 }));
        assert!(!err.is_unreadable());
    }

    #[test]
    fn test_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let result = MetaStore::open(&tmp.path().join("meta.jsonl"), &tmp.path().join("meta.idx"));
        assert!(matches!(result, Err(MetaStoreError::Missing(_))));
    }

    #[test]
    fn test_torn_offset_index_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let (log, idx) = write_store(tmp.path(), &records());

        let mut bytes = std::fs::read(&idx).unwrap();
        bytes.pop();
        std::fs::write(&idx, bytes).unwrap();

        let result = MetaStore::open(&log, &idx);
        assert!(matches!(result, Err(MetaStoreError::Corrupt(_))));
    }

    #[test]
    fn test_garbage_record_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("meta.jsonl");
        let idx = tmp.path().join("meta.idx");
        std::fs::write(&log, b"{not json\n").unwrap();
        std::fs::write(&idx, 0u64.to_le_bytes()).unwrap();

        let mut store = MetaStore::open(&log, &idx).unwrap();
        assert!(matches!(store.get(0), Err(MetaStoreError::Corrupt(_))));
        assert!(matches!(store.all_document_ids(), Err(MetaStoreError::Corrupt(_))));
    }

    #[test]
    fn test_list_sources_sorted_and_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let (log, idx) = write_store(tmp.path(), &records());

        let mut store = MetaStore::open(&log, &idx).unwrap();
        assert_eq!(store.list_sources().unwrap(), ["b.md", "note.md"]);

        // the scan must not disturb random access
        assert_eq!(store.get(1).unwrap().text, "test1");
    }

    #[test]
    fn test_reopen_sees_new_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let (log, idx) = write_store(tmp.path(), &records());

        {
            let mut store = MetaStore::open(&log, &idx).unwrap();
            assert_eq!(store.list_sources().unwrap().len(), 2);
        }

        write_store(tmp.path(), &[Chunk::new("d9", 0, "z.md", "zzz")]);

        let mut store = MetaStore::open(&log, &idx).unwrap();
        assert_eq!(store.list_sources().unwrap(), ["z.md"]);
    }

    #[test]
    fn test_fingerprint_tracks_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let (log, idx) = write_store(tmp.path(), &records());

        let on_disk = fingerprint(&log, &idx).unwrap();
        let mut store = MetaStore::open(&log, &idx).unwrap();
        assert_eq!(store.get(2).unwrap(), records()[2]);
        assert_eq!(store.fingerprint().unwrap(), on_disk);
        drop(store);

        // same slot count and offsets, different text
        let mut edited = records();
        edited[0].text = "test9".to_string();
        write_store(tmp.path(), &edited);
        assert_ne!(fingerprint(&log, &idx).unwrap(), on_disk);
    }

    #[test]
    fn test_all_document_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let (log, idx) = write_store(tmp.path(), &records());

        let mut store = MetaStore::open(&log, &idx).unwrap();
        let ids = store.all_document_ids().unwrap();
        assert_eq!(ids, HashSet::from(["d1".to_string(), "d2".to_string()]));
    }
}
