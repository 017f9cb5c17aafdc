use crate::error::Error;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace};

/// Length of a hex-encoded BLAKE3 digest.
const HASH_HEX_LEN: usize = 64;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Content address of a chunk: hex-encoded BLAKE3 of its bytes.
pub fn hash_chunk(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_HEX_LEN && hash.bytes().all(|b| b.is_ascii_hexdigit())
}

/// `.{hash}.{pid}.{n}.tmp`, as written by [`ChunkStore::put`].
fn is_temp_name(name: &str) -> bool {
    name.strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(".tmp"))
        .and_then(|rest| rest.split('.').next())
        .map(is_valid_hash)
        .unwrap_or(false)
}

/// Directory of immutable, content-named blobs. One file per unique hash.
#[derive(Debug)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!("Chunk store opened at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_path(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    pub fn has(&self, hash: &str) -> bool {
        is_valid_hash(hash) && self.chunk_path(hash).is_file()
    }

    /// Store `bytes` under `hash`. Writing a hash that is already present is a
    /// no-op. The blob is written under a temporary name and renamed into place,
    /// so readers never see a partial chunk. No fsync here: the sidecar commit
    /// is the durability point of a dedup.
    pub fn put(&self, hash: &str, bytes: &[u8]) -> Result<PathBuf, Error> {
        let storage_error = |source: io::Error| Error::StorageWrite {
            hash: hash.to_string(),
            source,
        };

        if !is_valid_hash(hash) {
            return Err(storage_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "malformed chunk hash",
            )));
        }

        let final_path = self.chunk_path(hash);
        if final_path.is_file() {
            trace!("Chunk {} already stored", hash);
            return Ok(final_path);
        }

        let temp_path = self.root.join(format!(
            ".{}.{}.{}.tmp",
            hash,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let result = (|| -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(bytes)?;
            fs::rename(&temp_path, &final_path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(storage_error(e));
        }

        trace!("Stored chunk {} ({} bytes)", hash, bytes.len());
        Ok(final_path)
    }

    pub fn get(&self, hash: &str) -> Result<Vec<u8>, Error> {
        if !is_valid_hash(hash) {
            return Err(Error::ChunkNotFound(hash.to_string()));
        }
        match fs::read(self.chunk_path(hash)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::ChunkNotFound(hash.to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Hashes of every blob currently on disk. Temporary files are skipped.
    pub fn hashes(&self) -> Result<Vec<String>, Error> {
        let mut hashes = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_valid_hash(name) {
                    hashes.push(name.to_string());
                }
            }
        }
        Ok(hashes)
    }

    pub fn count(&self) -> Result<usize, Error> {
        Ok(self.hashes()?.len())
    }

    /// Remove every blob and leftover temporary file. Anything else in the
    /// directory is left alone.
    pub fn clear(&self) -> Result<usize, Error> {
        let mut removed = 0usize;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let owned = entry
                .file_name()
                .to_str()
                .map(|name| is_valid_hash(name) || is_temp_name(name))
                .unwrap_or(false);
            if owned {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        info!("Cleared {} files from chunk store {}", removed, self.root.display());
        Ok(removed)
    }
}
