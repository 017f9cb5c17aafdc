use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Parallel directory traversal. Builds a map of path → file size for every
/// regular file under `root_paths`, filtering by glob ignore patterns.
/// Symlinks are skipped. Zero-byte files are kept.
pub fn build_file_size_map(
    root_paths: &[&str],
    ignore_globs: &[&str],
) -> io::Result<DashMap<PathBuf, u64>> {
    let map: DashMap<PathBuf, u64> = DashMap::new();

    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    root_paths
        .par_iter()
        .try_for_each(|root_dir| visit_dirs(Path::new(root_dir), &map, &ignore_patterns))?;

    Ok(map)
}

/// Same as [`build_file_size_map`] but returns paths sorted for a stable
/// processing order.
pub fn collect_files(root_paths: &[&str], ignore_globs: &[&str]) -> io::Result<Vec<PathBuf>> {
    let map = build_file_size_map(root_paths, ignore_globs)?;
    let mut files: Vec<PathBuf> = map.into_iter().map(|(path, _)| path).collect();
    files.sort();
    Ok(files)
}

fn visit_dirs(
    dir: &Path,
    map: &DashMap<PathBuf, u64>,
    ignore_patterns: &[Pattern],
) -> io::Result<()> {
    if !dir.is_dir() {
        warn!("Not a directory, skipping: {}", dir.display());
        return Ok(());
    }

    if ignore_patterns
        .iter()
        .any(|pattern| pattern.matches_path(dir))
    {
        return Ok(());
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            if err.kind() == io::ErrorKind::PermissionDenied {
                error!(
                    "Access denied reading directory {}: {}",
                    dir.display(),
                    err
                );
                return Ok(());
            } else {
                return Err(io::Error::new(
                    err.kind(),
                    format!("Error reading directory {}: {}", dir.display(), err),
                ));
            }
        }
    };

    entries.par_bridge().try_for_each(|entry_result| {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                return Err(io::Error::new(
                    err.kind(),
                    format!(
                        "Error reading entry in directory {}: {}",
                        dir.display(),
                        err
                    ),
                ));
            }
        };

        let path = entry.path();
        // Files can vanish between listing and stat; that is not fatal.
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Error getting metadata for {}: {}", path.display(), err);
                return Ok(());
            }
        };

        if metadata.file_type().is_symlink() {
            return Ok(());
        }

        if metadata.is_dir() {
            visit_dirs(&path, map, ignore_patterns)?;
        } else if metadata.is_file()
            && !ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(&path))
        {
            map.insert(path, metadata.len());
        }
        Ok(())
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_walk_includes_nested_and_empty_files() {
        let tmp = tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(tmp.path().join("top.log"), "x").unwrap();
        fs::write(nested.join("deep.bin"), "yy").unwrap();
        fs::write(nested.join("empty.dat"), "").unwrap();

        let root = tmp.path().to_string_lossy().into_owned();
        let map = build_file_size_map(&[root.as_str()], &[]).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(*map.get(&nested.join("deep.bin")).unwrap(), 2);
        assert_eq!(*map.get(&nested.join("empty.dat")).unwrap(), 0);
    }

    #[test]
    fn test_walk_honours_ignore_patterns() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("skip")).unwrap();
        fs::write(tmp.path().join("keep.csv"), "1").unwrap();
        fs::write(tmp.path().join("drop.tmp"), "1").unwrap();
        fs::write(tmp.path().join("skip/inner.csv"), "1").unwrap();

        let root = tmp.path().to_string_lossy().into_owned();
        let files = collect_files(&[root.as_str()], &["*.tmp", "*/skip"]).unwrap();
        assert_eq!(files, vec![tmp.path().join("keep.csv")]);
    }

    #[test]
    fn test_missing_root_is_not_an_error() {
        let files = collect_files(&["/definitely/missing/root"], &[]).unwrap();
        assert!(files.is_empty());
    }
}
