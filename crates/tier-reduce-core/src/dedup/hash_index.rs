use super::chunk_store::ChunkStore;
use crate::error::Error;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::PathBuf;
use tracing::info;

/// In-memory map of chunk hash → blob location. Authoritative for "seen before"
/// within a run. Every key refers to a blob that is present in the store.
#[derive(Debug, Default)]
pub struct HashIndex {
    entries: DashMap<String, PathBuf>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn location(&self, hash: &str) -> Option<PathBuf> {
        self.entries.get(hash).map(|entry| entry.value().clone())
    }

    /// Check-then-write-then-insert as one critical section for `hash`.
    ///
    /// The map entry stays locked while `write` runs, so two callers racing on
    /// the same new hash cannot both write it. `write` is only invoked on a miss
    /// and the hash is only inserted once `write` succeeds. Returns whether the
    /// chunk was new.
    ///
    /// `write` must not touch this index.
    pub fn insert_with<F>(&self, hash: &str, write: F) -> Result<bool, Error>
    where
        F: FnOnce() -> Result<PathBuf, Error>,
    {
        match self.entries.entry(hash.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                let location = write()?;
                vacant.insert(location);
                Ok(true)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&self) {
        self.entries.clear();
    }

    /// Re-learn every blob already present in `store`. Returns the number of
    /// entries added.
    pub fn rebuild_from_store(&self, store: &ChunkStore) -> Result<usize, Error> {
        let mut added = 0usize;
        for hash in store.hashes()? {
            let location = store.chunk_path(&hash);
            if self.entries.insert(hash, location).is_none() {
                added += 1;
            }
        }
        info!(
            "Hash index rebuilt from {}: {} chunks",
            store.root().display(),
            added
        );
        Ok(added)
    }
}
