use crate::error::Error;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Byte compression collaborator used for the `compress` action.
pub trait Codec: Send + Sync {
    /// Compress `path` in place of the original. Returns the new path and size.
    fn compress(&self, path: &Path) -> Result<(PathBuf, u64), Error>;

    /// Time to read the first block of decompressed data from `path`.
    fn decompress_probe(&self, path: &Path) -> Result<Duration, Error>;
}

#[derive(Debug, Clone)]
pub struct GzipCodec {
    level: u32,
    probe_bytes: usize,
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self::new(9, 4096)
    }
}

impl GzipCodec {
    pub fn new(level: u32, probe_bytes: usize) -> Self {
        Self {
            level: level.min(9),
            probe_bytes: probe_bytes.max(1),
        }
    }

    pub fn is_compressed(path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("gz")
    }

    fn compress_into(&self, source: &Path, target: &Path) -> io::Result<()> {
        let mut input = BufReader::new(File::open(source)?);
        let mut encoder = GzEncoder::new(File::create(target)?, Compression::new(self.level));
        io::copy(&mut input, &mut encoder)?;
        let file = encoder.finish()?;
        file.sync_all()
    }
}

impl Codec for GzipCodec {
    fn compress(&self, path: &Path) -> Result<(PathBuf, u64), Error> {
        if Self::is_compressed(path) {
            let size = fs::metadata(path)?.len();
            debug!("{} already compressed", path.display());
            return Ok((path.to_path_buf(), size));
        }

        let mut name = path.as_os_str().to_owned();
        name.push(".gz");
        let compressed_path = PathBuf::from(name);

        if let Err(e) = self.compress_into(path, &compressed_path) {
            let _ = fs::remove_file(&compressed_path);
            return Err(Error::Codec(format!(
                "compressing {}: {}",
                path.display(),
                e
            )));
        }

        let compressed_size = fs::metadata(&compressed_path)?.len();
        fs::remove_file(path)?;

        info!(
            "Compressed {} -> {} [Level {}]",
            path.display(),
            compressed_path.display(),
            self.level
        );
        Ok((compressed_path, compressed_size))
    }

    fn decompress_probe(&self, path: &Path) -> Result<Duration, Error> {
        let start = Instant::now();
        let mut decoder = GzDecoder::new(File::open(path)?);
        let mut buffer = vec![0u8; self.probe_bytes];
        let mut filled = 0;
        while filled < buffer.len() {
            let n = decoder
                .read(&mut buffer[filled..])
                .map_err(|e| Error::Codec(format!("decompressing {}: {}", path.display(), e)))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_compress_replaces_original() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("app.log");
        let line = "2025-09-02 12:00:00,123 - INFO - User logged in\n";
        fs::write(&path, line.repeat(500)).unwrap();

        let codec = GzipCodec::default();
        let (gz_path, size) = codec.compress(&path).unwrap();

        assert_eq!(gz_path, tmp.path().join("app.log.gz"));
        assert!(!path.exists());
        assert!(size < (line.len() * 500) as u64);

        let mut decoded = String::new();
        GzDecoder::new(File::open(&gz_path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, line.repeat(500));

        codec.decompress_probe(&gz_path).unwrap();
    }

    #[test]
    fn test_already_compressed_is_untouched() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("old.log.gz");
        fs::write(&path, b"whatever").unwrap();

        let (same, size) = GzipCodec::default().compress(&path).unwrap();
        assert_eq!(same, path);
        assert_eq!(size, 8);
        assert!(path.exists());
    }

    #[test]
    fn test_probe_rejects_non_gzip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("fake.gz");
        fs::write(&path, b"plain text, not gzip").unwrap();
        assert!(matches!(
            GzipCodec::default().decompress_probe(&path),
            Err(Error::Codec(_))
        ));
    }

    #[test]
    fn test_missing_source_keeps_nothing_behind() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("ghost.log");
        assert!(GzipCodec::default().compress(&path).is_err());
        assert!(!tmp.path().join("ghost.log.gz").exists());
    }
}
