use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const METADATA_EXTENSION: &str = "meta";

/// Ordered chunk hashes that rebuild one file by concatenation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub chunks: Vec<String>,
}

impl FileMetadata {
    /// Durably write the record to `path`: temp file, fsync, rename.
    /// Returns the size of the committed record in bytes.
    pub fn write(&self, path: &Path) -> Result<u64, Error> {
        self.commit(path, None)
    }

    /// Like [`Self::write`], but the committed record carries `modified` as its
    /// mtime so it ages with the data it describes.
    pub fn write_stamped(&self, path: &Path, modified: SystemTime) -> Result<u64, Error> {
        self.commit(path, Some(modified))
    }

    fn commit(&self, path: &Path, modified: Option<SystemTime>) -> Result<u64, Error> {
        let json = serde_json::to_vec(self).map_err(|e| Error::Metadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let result = (|| -> std::io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(&json)?;
            if let Some(modified) = modified {
                file.set_modified(modified)?;
            }
            file.sync_all()?;
            fs::rename(&temp_path, path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::Io(e));
        }

        Ok(json.len() as u64)
    }

    pub fn read(path: &Path) -> Result<Self, Error> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Metadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// `<original_path>.meta`
pub fn metadata_path_for(original: &Path) -> PathBuf {
    let mut name: OsString = original.as_os_str().to_owned();
    name.push(".");
    name.push(METADATA_EXTENSION);
    PathBuf::from(name)
}

/// Inverse of [`metadata_path_for`]. `None` if `path` is not a sidecar.
pub fn original_path_for(path: &Path) -> Option<PathBuf> {
    if path.extension().and_then(|e| e.to_str()) != Some(METADATA_EXTENSION) {
        return None;
    }
    let original = path.with_extension("");
    if original.file_name().is_none() {
        return None;
    }
    Some(original)
}

pub fn is_metadata_file(path: &Path) -> bool {
    original_path_for(path).is_some()
}
