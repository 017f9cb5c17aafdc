use crate::codec::{Codec, GzipCodec};
use crate::error::Error;
use crate::policy::engine::{age_in_days, stat_modified};
use chrono::{DateTime, Local};
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info};

pub const ACTIVE_LOG: &str = "app.log";

#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    pub rotation_days: f64,
    pub compression_days: f64,
    pub retention_days: f64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            rotation_days: 1.0,
            compression_days: 7.0,
            retention_days: 30.0,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationSummary {
    pub rotated: usize,
    pub compressed: usize,
    pub pruned: usize,
}

/// Rotate `dir/app.log`, compress old rotated logs, prune old compressed logs.
///
/// A failure on one rotated file is logged and the remaining files are still
/// processed.
pub fn rotate_logs(
    dir: &Path,
    policy: &RotationPolicy,
    codec: &dyn Codec,
    now: SystemTime,
) -> Result<RotationSummary, Error> {
    let mut summary = RotationSummary::default();

    let active = dir.join(ACTIVE_LOG);
    if active.is_file() {
        let modified = stat_modified(&active)?;
        if age_in_days(modified, now) > policy.rotation_days {
            let stamp = DateTime::<Local>::from(modified).format("%Y-%m-%d_%H%M%S");
            let rotated = dir.join(format!("{}.{}", ACTIVE_LOG, stamp));
            fs::rename(&active, &rotated)?;
            info!("Rotated {} -> {}", active.display(), rotated.display());
            summary.rotated += 1;
        }
    }

    for log in rotated_logs(dir)? {
        if GzipCodec::is_compressed(&log) {
            continue;
        }
        match older_than(&log, policy.compression_days, now) {
            Ok(true) => match codec.compress(&log) {
                Ok(_) => summary.compressed += 1,
                Err(e) => error!("Failed to compress {}: {}", log.display(), e),
            },
            Ok(false) => {}
            Err(e) => error!("Skipping {}: {}", log.display(), e),
        }
    }

    for log in rotated_logs(dir)? {
        if !GzipCodec::is_compressed(&log) {
            continue;
        }
        match older_than(&log, policy.retention_days, now) {
            Ok(true) => match fs::remove_file(&log) {
                Ok(()) => {
                    info!("Pruned old log file: {}", log.display());
                    summary.pruned += 1;
                }
                Err(e) => error!("Failed to prune {}: {}", log.display(), e),
            },
            Ok(false) => {}
            Err(e) => error!("Skipping {}: {}", log.display(), e),
        }
    }

    Ok(summary)
}

fn older_than(path: &Path, days: f64, now: SystemTime) -> Result<bool, Error> {
    let modified = stat_modified(path)?;
    Ok(age_in_days(modified, now) > days)
}

/// Every `app.log.*` in `dir`, sorted.
fn rotated_logs(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let pattern = format!(
        "{}/{}.*",
        Pattern::escape(&dir.to_string_lossy()),
        ACTIVE_LOG
    );
    let mut logs = Vec::new();
    for entry in glob::glob(&pattern).map_err(|e| Error::Other(e.to_string()))? {
        match entry {
            Ok(path) if path.is_file() => logs.push(path),
            Ok(_) => {}
            Err(e) => error!("Unreadable log entry: {}", e),
        }
    }
    logs.sort();
    Ok(logs)
}
