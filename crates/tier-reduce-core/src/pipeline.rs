use crate::aggregate::{aggregate_output_path, is_aggregate_output, Aggregator, CsvAggregator};
use crate::codec::{Codec, GzipCodec};
use crate::config::{self, AppConfig};
use crate::dedup::{original_path_for, ChunkStore, DedupEngine, HashIndex};
use crate::error::Error;
use crate::policy::engine::stat_modified;
use crate::policy::{ActionKind, FileStatus, PolicyEngine, Tier};
use crate::progress::ProgressReporter;
use crate::report::SummaryReport;
use crate::scanner;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// A data file subject to every action.
    Source,
    /// A dedup `.meta` record; only ever purged when its tier expires.
    Sidecar,
}

#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub kind: CandidateKind,
    pub status: FileStatus,
    /// Action actually carried out, which can differ from `status.action`
    /// (e.g. `aggregate` on a non-CSV file).
    pub applied: ActionKind,
    pub original_size: u64,
    pub final_size: u64,
    pub final_path: Option<PathBuf>,
    pub elapsed: Duration,
    pub latency: Option<Duration>,
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug)]
pub struct PipelineReport {
    pub outcomes: Vec<FileOutcome>,
    pub summary: SummaryReport,
    pub scan_duration: Duration,
    pub process_duration: Duration,
    pub failures: usize,
}

pub struct Pipeline {
    config: AppConfig,
    policy: PolicyEngine,
    dedup: DedupEngine,
    codec: Box<dyn Codec>,
    aggregator: Box<dyn Aggregator>,
}

impl Pipeline {
    pub fn new(config: AppConfig, policy: PolicyEngine, dedup: DedupEngine) -> Self {
        let codec = GzipCodec::new(config.compression_level, config.probe_bytes);
        let aggregator = CsvAggregator::new(config.aggregate_bucket_secs);
        Self {
            config,
            policy,
            dedup,
            codec: Box::new(codec),
            aggregator: Box::new(aggregator),
        }
    }

    /// Load the policy and open the chunk store named by `config`.
    ///
    /// With `fresh`, the store is emptied first. Otherwise the hash index is
    /// rebuilt from blobs already on disk so earlier runs are deduplicated against.
    pub fn from_config(config: AppConfig, fresh: bool) -> Result<Self, Error> {
        let policy = PolicyEngine::from_file(Path::new(&config.policy_path))?;
        let store = Arc::new(ChunkStore::open(&config.chunk_store_dir)?);
        let index = Arc::new(HashIndex::new());

        if fresh {
            let removed = store.clear()?;
            if removed > 0 {
                warn!(
                    "Cleared {} chunks for a fresh run; existing .meta records can no longer be restored",
                    removed
                );
            }
        } else {
            index.rebuild_from_store(&store)?;
        }

        let dedup = DedupEngine::new(store, index, config.chunk_size);
        Ok(Self::new(config, policy, dedup))
    }

    pub fn with_codec(mut self, codec: Box<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_aggregator(mut self, aggregator: Box<dyn Aggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn dedup(&self) -> &DedupEngine {
        &self.dedup
    }

    /// Candidate files under the configured data paths, sorted. Outputs of
    /// earlier reductions (`.gz`, `_agg.csv`) and the chunk store itself are
    /// excluded.
    pub fn discover(&self) -> Result<Vec<(PathBuf, CandidateKind)>, Error> {
        let roots = config::non_overlapping_directories(self.config.data_paths.clone());
        info!("Processing directories: {:?}", roots);

        let root_slices: Vec<&str> = roots.iter().map(|s| s.as_str()).collect();
        let ignore_slices: Vec<&str> = self
            .config
            .ignore_patterns
            .iter()
            .map(|s| s.as_str())
            .collect();

        let store_root = fs::canonicalize(self.dedup.store().root()).ok();
        let files = scanner::collect_files(&root_slices, &ignore_slices)?;

        let candidates: Vec<(PathBuf, CandidateKind)> = files
            .into_iter()
            .filter(|path| match (&store_root, fs::canonicalize(path)) {
                (Some(root), Ok(canonical)) => !canonical.starts_with(root),
                _ => true,
            })
            .filter_map(|path| classify_candidate(&path).map(|kind| (path, kind)))
            .collect();

        Ok(drop_shadowed_sidecars(candidates))
    }

    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<PipelineReport, Error> {
        self.run_at(SystemTime::now(), reporter)
    }

    /// Run the full pipeline as if the clock read `now`:
    /// 1. Discover candidates
    /// 2. Evaluate and dispatch every file across the rayon pool
    /// 3. Fold outcomes into a summary
    pub fn run_at(
        &self,
        now: SystemTime,
        reporter: &dyn ProgressReporter,
    ) -> Result<PipelineReport, Error> {
        info!("Starting data reduction pipeline");

        reporter.on_scan_start();
        let scan_start = Instant::now();
        let candidates = self.discover()?;
        let scan_duration = scan_start.elapsed();
        reporter.on_scan_complete(candidates.len(), scan_duration.as_secs_f64());

        let total = candidates.len();
        reporter.on_process_start(total);
        let process_start = Instant::now();
        let done = AtomicUsize::new(0);

        let outcomes: Vec<FileOutcome> = candidates
            .par_iter()
            .map(|(path, kind)| {
                let outcome = self.process_file(path, *kind, now);
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                reporter.on_file_complete(finished, total, &path.to_string_lossy());
                outcome
            })
            .collect();

        let process_duration = process_start.elapsed();
        let failures = outcomes.iter().filter(|o| o.is_failure()).count();
        reporter.on_process_complete(total, failures, process_duration.as_secs_f64());

        let mut summary = SummaryReport::new();
        for outcome in &outcomes {
            if outcome.kind == CandidateKind::Source && outcome.status.tier != Tier::Error {
                summary.record(
                    &outcome.path,
                    outcome.original_size,
                    outcome.final_size,
                    outcome.elapsed,
                    outcome.latency,
                );
            }
        }

        info!(
            "Pipeline complete: {} files in {:.2}s, {} failures",
            total,
            process_duration.as_secs_f64(),
            failures
        );

        Ok(PipelineReport {
            outcomes,
            summary,
            scan_duration,
            process_duration,
            failures,
        })
    }

    /// Evaluate one file and carry out its action. Never fails: errors are
    /// captured in the outcome so the caller can move on to the next file.
    pub fn process_file(&self, path: &Path, kind: CandidateKind, now: SystemTime) -> FileOutcome {
        let start = Instant::now();
        match kind {
            CandidateKind::Source => self.process_source(path, now, start),
            CandidateKind::Sidecar => self.process_sidecar(path, now, start),
        }
    }

    fn process_source(&self, path: &Path, now: SystemTime, start: Instant) -> FileOutcome {
        let status = self.policy.evaluate_path(path, now);
        let mut outcome = FileOutcome {
            path: path.to_path_buf(),
            kind: CandidateKind::Source,
            status: status.clone(),
            applied: ActionKind::None,
            original_size: 0,
            final_size: 0,
            final_path: None,
            elapsed: Duration::ZERO,
            latency: None,
            error: None,
        };

        if status.is_error() {
            outcome.error = status.error.clone();
            outcome.elapsed = start.elapsed();
            return outcome;
        }

        outcome.original_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        info!(
            "[POLICY] {} (Age: {:.1}d) -> Tier: {}, Action: {}",
            path.display(),
            status.age_days,
            status.tier,
            status.action
        );

        match self.dispatch(path, status.action, outcome.original_size) {
            Ok(applied) => {
                outcome.applied = applied.action;
                outcome.final_size = applied.final_size;
                outcome.final_path = applied.final_path;
                outcome.latency = applied.latency;
            }
            Err(e) => {
                error!("[ERROR] Failed to process {}: {}", path.display(), e);
                outcome.final_size = outcome.original_size;
                outcome.final_path = Some(path.to_path_buf());
                outcome.error = Some(e.to_string());
            }
        }

        outcome.elapsed = start.elapsed();
        outcome
    }

    fn dispatch(&self, path: &Path, action: ActionKind, original_size: u64) -> Result<Applied, Error> {
        match action {
            ActionKind::Compress => {
                let (new_path, size) = self.codec.compress(path)?;
                let latency = self.codec.decompress_probe(&new_path)?;
                Ok(Applied::new(action, size, Some(new_path), Some(latency)))
            }
            ActionKind::Deduplicate => {
                let outcome = self.dedup.deduplicate(path)?;
                let latency = self.dedup.measure_read_latency(&outcome.metadata_path)?;
                Ok(Applied::new(
                    action,
                    outcome.final_size,
                    Some(outcome.metadata_path),
                    Some(latency),
                ))
            }
            ActionKind::Aggregate => {
                if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                    warn!("Aggregate requested for non-CSV {}, leaving untouched", path.display());
                    return Ok(Applied::new(
                        ActionKind::None,
                        original_size,
                        Some(path.to_path_buf()),
                        None,
                    ));
                }
                let output = aggregate_output_path(path);
                let (output, size) = self.aggregator.aggregate(path, &output)?;
                let latency = measure_raw_latency(&output, self.config.probe_bytes)?;
                Ok(Applied::new(action, size, Some(output), Some(latency)))
            }
            ActionKind::Delete => {
                fs::remove_file(path)?;
                info!("Deleted {}", path.display());
                Ok(Applied::new(action, 0, None, None))
            }
            ActionKind::None => {
                let latency = measure_raw_latency(path, self.config.probe_bytes)?;
                Ok(Applied::new(
                    action,
                    original_size,
                    Some(path.to_path_buf()),
                    Some(latency),
                ))
            }
        }
    }

    fn process_sidecar(&self, path: &Path, now: SystemTime, start: Instant) -> FileOutcome {
        let original_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let mut outcome = FileOutcome {
            path: path.to_path_buf(),
            kind: CandidateKind::Sidecar,
            status: FileStatus {
                rule: None,
                age_days: 0.0,
                tier: Tier::Error,
                action: ActionKind::None,
                error: None,
            },
            applied: ActionKind::None,
            original_size,
            final_size: original_size,
            final_path: Some(path.to_path_buf()),
            elapsed: Duration::ZERO,
            latency: None,
            error: None,
        };

        // The sidecar inherits the rule of the file it describes.
        let original = original_path_for(path).unwrap_or_else(|| path.to_path_buf());
        match stat_modified(path) {
            Ok(modified) => {
                outcome.status = self.policy.evaluate(&original, modified, now);
            }
            Err(e) => {
                error!("Error processing file {}: {}", path.display(), e);
                outcome.status.error = Some(e.to_string());
                outcome.error = Some(e.to_string());
                outcome.elapsed = start.elapsed();
                return outcome;
            }
        }

        if outcome.status.tier == Tier::Expired {
            match fs::remove_file(path) {
                Ok(()) => {
                    info!("Purged expired metadata {}", path.display());
                    outcome.applied = ActionKind::Delete;
                    outcome.final_size = 0;
                    outcome.final_path = None;
                }
                Err(e) => {
                    error!("[ERROR] Failed to purge {}: {}", path.display(), e);
                    outcome.error = Some(e.to_string());
                }
            }
        } else {
            debug!(
                "Metadata {} in tier {}, kept",
                path.display(),
                outcome.status.tier
            );
        }

        outcome.elapsed = start.elapsed();
        outcome
    }
}

struct Applied {
    action: ActionKind,
    final_size: u64,
    final_path: Option<PathBuf>,
    latency: Option<Duration>,
}

impl Applied {
    fn new(
        action: ActionKind,
        final_size: u64,
        final_path: Option<PathBuf>,
        latency: Option<Duration>,
    ) -> Self {
        Self {
            action,
            final_size,
            final_path,
            latency,
        }
    }
}

fn classify_candidate(path: &Path) -> Option<CandidateKind> {
    let name = path.file_name()?.to_string_lossy();
    if name.ends_with(".gz") || name.ends_with(".meta.tmp") || is_aggregate_output(path) {
        return None;
    }
    if original_path_for(path).is_some() {
        return Some(CandidateKind::Sidecar);
    }
    Some(CandidateKind::Source)
}

/// A sidecar whose original is still present will be rewritten by that
/// file's own dedup, so it must not also be handed to a purge worker.
fn drop_shadowed_sidecars(
    candidates: Vec<(PathBuf, CandidateKind)>,
) -> Vec<(PathBuf, CandidateKind)> {
    let sources: HashSet<PathBuf> = candidates
        .iter()
        .filter(|(_, kind)| *kind == CandidateKind::Source)
        .map(|(path, _)| path.clone())
        .collect();

    candidates
        .into_iter()
        .filter(|(path, kind)| match (kind, original_path_for(path)) {
            (CandidateKind::Sidecar, Some(original)) if sources.contains(&original) => {
                debug!(
                    "Skipping {}: its original is processed in this run",
                    path.display()
                );
                false
            }
            _ => true,
        })
        .collect()
}

/// Time a single read of the first `probe_bytes` of an uncompressed file.
pub fn measure_raw_latency(path: &Path, probe_bytes: usize) -> Result<Duration, Error> {
    let start = Instant::now();
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; probe_bytes.max(1)];
    let _ = file.read(&mut buffer)?;
    Ok(start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_candidate() {
        assert_eq!(
            classify_candidate(Path::new("d/app.log")),
            Some(CandidateKind::Source)
        );
        assert_eq!(
            classify_candidate(Path::new("d/r.bin.meta")),
            Some(CandidateKind::Sidecar)
        );
        assert_eq!(classify_candidate(Path::new("d/app.log.gz")), None);
        assert_eq!(classify_candidate(Path::new("d/sensor_agg.csv")), None);
        assert_eq!(classify_candidate(Path::new("d/r.bin.meta.tmp")), None);
    }

    #[test]
    fn test_sidecar_next_to_its_source_is_dropped() {
        let candidates = vec![
            (PathBuf::from("d/x.bin"), CandidateKind::Source),
            (PathBuf::from("d/x.bin.meta"), CandidateKind::Sidecar),
            (PathBuf::from("d/y.bin.meta"), CandidateKind::Sidecar),
        ];
        let kept = drop_shadowed_sidecars(candidates);
        assert_eq!(
            kept,
            vec![
                (PathBuf::from("d/x.bin"), CandidateKind::Source),
                (PathBuf::from("d/y.bin.meta"), CandidateKind::Sidecar),
            ]
        );
    }
}
