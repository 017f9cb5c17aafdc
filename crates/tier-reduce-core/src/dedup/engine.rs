use super::chunk_store::{hash_chunk, ChunkStore};
use super::hash_index::HashIndex;
use super::metadata::{metadata_path_for, FileMetadata};
use crate::error::Error;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub metadata_path: PathBuf,
    /// Metadata record size plus bytes of chunks newly written by this call.
    pub final_size: u64,
    pub original_size: u64,
    pub new_bytes: u64,
    pub saved_bytes: u64,
    pub chunk_count: usize,
    pub new_chunks: usize,
}

/// Fixed-size block deduplication over a shared [`ChunkStore`] and [`HashIndex`].
///
/// Cloning is cheap; clones share the same store and index, so one engine can
/// be handed to every worker of a run.
#[derive(Debug, Clone)]
pub struct DedupEngine {
    store: Arc<ChunkStore>,
    index: Arc<HashIndex>,
    chunk_size: usize,
}

impl DedupEngine {
    pub fn new(store: Arc<ChunkStore>, index: Arc<HashIndex>, chunk_size: usize) -> Self {
        Self {
            store,
            index,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn index(&self) -> &HashIndex {
        &self.index
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `path` into fixed windows, store unseen chunks, commit the sidecar,
    /// then delete the original. The original survives any failure before the
    /// sidecar is committed.
    pub fn deduplicate(&self, path: &Path) -> Result<DedupOutcome, Error> {
        let mut file = File::open(path)?;
        let source_meta = file.metadata()?;
        let original_size = source_meta.len();
        let modified = source_meta.modified()?;

        let mut chunks = Vec::new();
        let mut new_bytes = 0u64;
        let mut saved_bytes = 0u64;
        let mut new_chunks = 0usize;
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let n = read_window(&mut file, &mut buffer)?;
            if n == 0 {
                break;
            }
            let window = &buffer[..n];
            let hash = hash_chunk(window);

            let is_new = self
                .index
                .insert_with(&hash, || self.store.put(&hash, window))?;
            if is_new {
                new_bytes += n as u64;
                new_chunks += 1;
            } else {
                saved_bytes += n as u64;
            }
            chunks.push(hash);
        }
        drop(file);

        let chunk_count = chunks.len();
        let metadata_path = metadata_path_for(path);
        // Sidecar ages with the data it replaces.
        let metadata_size = FileMetadata { chunks }.write_stamped(&metadata_path, modified)?;

        fs::remove_file(path)?;

        let final_size = metadata_size + new_bytes;
        info!(
            "Deduplicated {}. Original: {}, Final: {}, Saved: {}",
            path.display(),
            original_size,
            final_size,
            saved_bytes
        );

        Ok(DedupOutcome {
            metadata_path,
            final_size,
            original_size,
            new_bytes,
            saved_bytes,
            chunk_count,
            new_chunks,
        })
    }

    /// Bytes of the first chunk recorded in `metadata_path`. Empty for a
    /// zero-length file.
    pub fn read_first_chunk(&self, metadata_path: &Path) -> Result<Vec<u8>, Error> {
        let metadata = FileMetadata::read(metadata_path)?;
        match metadata.chunks.first() {
            Some(hash) => self.store.get(hash),
            None => Ok(Vec::new()),
        }
    }

    /// Time [`Self::read_first_chunk`]. Samples reconstruction latency only.
    pub fn measure_read_latency(&self, metadata_path: &Path) -> Result<Duration, Error> {
        let start = Instant::now();
        let bytes = self.read_first_chunk(metadata_path)?;
        let elapsed = start.elapsed();
        debug!(
            "Read first chunk of {} ({} bytes) in {:?}",
            metadata_path.display(),
            bytes.len(),
            elapsed
        );
        Ok(elapsed)
    }

    /// Rebuild the original bytes from `metadata_path` into `output`, checking
    /// every chunk against its address. Returns the number of bytes written.
    pub fn restore(&self, metadata_path: &Path, output: &Path) -> Result<u64, Error> {
        let metadata = FileMetadata::read(metadata_path)?;

        let mut temp_name = output.as_os_str().to_owned();
        temp_name.push(".restore");
        let temp_path = PathBuf::from(temp_name);

        let result = self.write_chunks(&metadata, &temp_path).and_then(|written| {
            fs::rename(&temp_path, output)?;
            Ok(written)
        });

        match result {
            Ok(written) => {
                info!(
                    "Restored {} from {} ({} chunks, {} bytes)",
                    output.display(),
                    metadata_path.display(),
                    metadata.chunks.len(),
                    written
                );
                Ok(written)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                warn!("Restore of {} failed: {}", metadata_path.display(), e);
                Err(e)
            }
        }
    }

    fn write_chunks(&self, metadata: &FileMetadata, path: &Path) -> Result<u64, Error> {
        let mut out = File::create(path)?;
        let mut written = 0u64;
        for hash in &metadata.chunks {
            let bytes = self.store.get(hash)?;
            if hash_chunk(&bytes) != *hash {
                return Err(Error::Metadata {
                    path: self.store.chunk_path(hash),
                    reason: "chunk content does not match its hash".into(),
                });
            }
            out.write_all(&bytes)?;
            written += bytes.len() as u64;
        }
        out.sync_all()?;
        Ok(written)
    }
}

/// Fill `buf` from `reader` until it is full or the reader is exhausted.
fn read_window<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn engine(chunk_size: usize) -> (TempDir, DedupEngine) {
        let tmp = tempdir().unwrap();
        let store = Arc::new(ChunkStore::open(tmp.path().join("chunk_store")).unwrap());
        let engine = DedupEngine::new(store, Arc::new(HashIndex::new()), chunk_size);
        (tmp, engine)
    }

    /// Reader that hands out at most `step` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_read_window_fills_across_short_reads() {
        let data: Vec<u8> = (0..10u8).collect();
        let mut reader = Trickle { data: &data, step: 3 };
        let mut buf = [0u8; 8];
        assert_eq!(read_window(&mut reader, &mut buf).unwrap(), 8);
        assert_eq!(&buf, &data[..8]);
        assert_eq!(read_window(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_window(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_small_file_single_chunk() {
        let (tmp, engine) = engine(4096);
        let path = tmp.path().join("tiny.bin");
        fs::write(&path, b"0123456789").unwrap();

        let outcome = engine.deduplicate(&path).unwrap();
        let meta = FileMetadata::read(&outcome.metadata_path).unwrap();
        assert_eq!(meta.chunks.len(), 1);
        assert_eq!(outcome.new_chunks, 1);
        assert_eq!(outcome.new_bytes, 10);
        assert_eq!(outcome.saved_bytes, 0);
        assert_eq!(engine.store().get(&meta.chunks[0]).unwrap().len(), 10);
        assert!(!path.exists());
    }

    #[test]
    fn test_final_size_is_metadata_plus_new_bytes() {
        let (tmp, engine) = engine(4);
        let path = tmp.path().join("f.bin");
        fs::write(&path, b"aaaabbbbaaaa").unwrap();

        let outcome = engine.deduplicate(&path).unwrap();
        let meta_len = fs::metadata(&outcome.metadata_path).unwrap().len();
        assert_eq!(outcome.chunk_count, 3);
        assert_eq!(outcome.new_bytes, 8);
        assert_eq!(outcome.saved_bytes, 4);
        assert_eq!(outcome.final_size, meta_len + 8);
    }

    #[test]
    fn test_zero_length_file() {
        let (tmp, engine) = engine(4096);
        let path = tmp.path().join("empty.bin");
        fs::write(&path, b"").unwrap();

        let outcome = engine.deduplicate(&path).unwrap();
        assert_eq!(outcome.chunk_count, 0);
        assert!(FileMetadata::read(&outcome.metadata_path)
            .unwrap()
            .chunks
            .is_empty());
        assert!(engine.read_first_chunk(&outcome.metadata_path).unwrap().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_read_first_chunk_and_restore() {
        let (tmp, engine) = engine(4);
        let path = tmp.path().join("r.bin");
        let content = b"first-second-third".to_vec();
        fs::write(&path, &content).unwrap();

        let outcome = engine.deduplicate(&path).unwrap();
        assert_eq!(engine.read_first_chunk(&outcome.metadata_path).unwrap(), b"firs");

        let restored = tmp.path().join("restored.bin");
        let written = engine.restore(&outcome.metadata_path, &restored).unwrap();
        assert_eq!(written, content.len() as u64);
        assert_eq!(fs::read(&restored).unwrap(), content);
    }

    #[test]
    fn test_restore_detects_missing_chunk() {
        let (tmp, engine) = engine(4);
        let path = tmp.path().join("m.bin");
        fs::write(&path, b"abcdefgh").unwrap();
        let outcome = engine.deduplicate(&path).unwrap();

        engine.store().clear().unwrap();
        let restored = tmp.path().join("out.bin");
        assert!(matches!(
            engine.restore(&outcome.metadata_path, &restored),
            Err(Error::ChunkNotFound(_))
        ));
        assert!(!restored.exists());
    }

    #[test]
    fn test_sidecar_carries_source_mtime() {
        let (tmp, engine) = engine(16);
        let path = tmp.path().join("aged.bin");
        fs::write(&path, vec![3u8; 40]).unwrap();
        let stamp = std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(stamp)
            .unwrap();

        let outcome = engine.deduplicate(&path).unwrap();
        let sidecar_mtime = fs::metadata(&outcome.metadata_path)
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(sidecar_mtime, stamp);
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let (tmp, engine) = engine(4096);
        let result = engine.deduplicate(&tmp.path().join("ghost.bin"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
