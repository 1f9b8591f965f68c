//! Persistent storage for segment files
//!
//! Segments live flat in one directory as `seg_{gen}_{level}_{seq}.fts`.
//! Writes go to a temporary file that is synced and renamed into place, so
//! a listed segment is always complete.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use memmap2::Mmap;
use tracing::{debug, warn};

use crate::error::Result;

use super::reader::{SegmentBytes, SegmentReader};
use super::types::SegmentId;

const TMP_SUFFIX: &str = ".tmp";

/// Directory of segment files
#[derive(Debug)]
pub struct SegmentStore {
    base_dir: PathBuf,
    next_sequence: Arc<AtomicU32>,
}

impl SegmentStore {
    /// Open (creating if needed) a segment directory
    ///
    /// Leftover temporary files from interrupted writes are removed.
    pub fn open<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        Self::scan(base_dir.as_ref(), true)
    }

    /// Open an existing directory without modifying it
    pub fn open_read_only<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        Self::scan(base_dir.as_ref(), false)
    }

    fn scan(base_dir: &Path, clean: bool) -> Result<Self> {
        let mut max_sequence = 0u32;
        for entry in fs::read_dir(base_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if clean && name.ends_with(TMP_SUFFIX) {
                warn!(file = name, "Removing incomplete segment file");
                fs::remove_file(entry.path())?;
            } else if let Some(id) = SegmentId::parse(name) {
                max_sequence = max_sequence.max(id.sequence);
            }
        }

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            next_sequence: Arc::new(AtomicU32::new(max_sequence + 1)),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path(&self, id: SegmentId) -> PathBuf {
        self.base_dir.join(id.file_name())
    }

    /// Allocate the next segment sequence number
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Shared sequence counter, for writers allocating ids concurrently
    pub fn sequence_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.next_sequence)
    }

    /// All segments on disk, oldest first
    pub fn list(&self) -> Result<Vec<SegmentId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(SegmentId::parse) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Highest generation present, 0 for an empty store
    pub fn max_generation(&self) -> Result<u32> {
        Ok(self.list()?.iter().map(|id| id.generation).max().unwrap_or(0))
    }

    /// Durably write a segment file
    pub fn write(&self, id: SegmentId, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(id);
        let tmp = self.base_dir.join(format!("{}{}", id.file_name(), TMP_SUFFIX));

        let result = (|| -> Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        // Make the rename durable
        if let Ok(dir) = File::open(&self.base_dir) {
            let _ = dir.sync_all();
        }
        debug!(segment = %id, bytes = bytes.len(), "Wrote segment file");
        Ok(path)
    }

    /// Open a segment by reading it into memory
    pub fn read(&self, id: SegmentId) -> Result<SegmentReader> {
        let bytes = fs::read(self.path(id))?;
        SegmentReader::open(bytes.into(), &id.file_name())
    }

    /// Open a segment over a read-only memory map
    pub fn map(&self, id: SegmentId) -> Result<SegmentReader> {
        let file = File::open(self.path(id))?;
        // SAFETY: segment files are immutable once renamed into place and
        // are only removed after every reader has been swapped out.
        let map = unsafe { Mmap::map(&file) }?;
        SegmentReader::open(SegmentBytes::Mapped(Arc::new(map)), &id.file_name())
    }

    pub fn delete(&self, id: SegmentId) -> Result<()> {
        fs::remove_file(self.path(id))?;
        debug!(segment = %id, "Deleted segment file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::segment::buffer::MutableBuffer;
    use crate::segment::writer::SegmentWriter;
    use crate::tokenizer::Tokenizer;
    use tempfile::TempDir;

    fn segment(id: SegmentId) -> Vec<u8> {
        let config = EngineConfig::default();
        let tokenizer = Tokenizer::new(&config.tokenizer);
        let mut buffer = MutableBuffer::new();
        let (tokens, len) = tokenizer.tokens("stored segment text");
        buffer.index_document(0, "a".into(), tokens, len);
        SegmentWriter::new(id, &config).write_buffer(&buffer).unwrap()
    }

    #[test]
    fn test_write_list_read_delete() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path()).unwrap();

        let first = SegmentId::new(1, 0, store.next_sequence());
        let second = SegmentId::new(1, 0, store.next_sequence());
        store.write(second, &segment(second)).unwrap();
        store.write(first, &segment(first)).unwrap();

        assert_eq!(store.list().unwrap(), vec![first, second]);
        assert!(dir.path().join("seg_1_0_1.fts").exists());

        let owned = store.read(first).unwrap();
        assert!(!owned.is_mapped());
        assert_eq!(owned.doc_frequency("segment"), 1);

        let mapped = store.map(second).unwrap();
        assert!(mapped.is_mapped());
        assert_eq!(mapped.id(), second);

        store.delete(first).unwrap();
        assert_eq!(store.list().unwrap(), vec![second]);
    }

    #[test]
    fn test_reopen_continues_sequence_and_cleans_tmp() {
        let dir = TempDir::new().unwrap();
        {
            let store = SegmentStore::open(dir.path()).unwrap();
            let id = SegmentId::new(2, 0, 5);
            store.write(id, &segment(id)).unwrap();
        }
        fs::write(dir.path().join("seg_2_0_6.fts.tmp"), b"partial").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let store = SegmentStore::open(dir.path()).unwrap();
        assert_eq!(store.next_sequence(), 6);
        assert_eq!(store.max_generation().unwrap(), 2);
        assert!(!dir.path().join("seg_2_0_6.fts.tmp").exists());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_read_only_open_requires_directory() {
        let dir = TempDir::new().unwrap();
        assert!(SegmentStore::open_read_only(dir.path().join("missing")).is_err());

        fs::write(dir.path().join("seg_1_0_1.fts.tmp"), b"partial").unwrap();
        let store = SegmentStore::open_read_only(dir.path()).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(dir.path().join("seg_1_0_1.fts.tmp").exists());
    }
}
