/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif. All methods have default no-op
/// implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_complete(&self, _total_files: usize, _duration_secs: f64) {}
    fn on_process_start(&self, _total_files: usize) {}
    fn on_file_complete(&self, _files_done: usize, _total_files: usize, _current_path: &str) {}
    fn on_process_complete(&self, _processed: usize, _failures: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
