pub mod aggregate;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod progress;
pub mod report;
pub mod rotation;
pub mod scanner;

pub use config::AppConfig;
pub use dedup::{ChunkStore, DedupEngine, DedupOutcome, HashIndex};
pub use error::Error;
pub use pipeline::{CandidateKind, FileOutcome, Pipeline, PipelineReport};
pub use policy::{ActionKind, FileStatus, PolicyEngine, Tier};
pub use progress::{ProgressReporter, SilentReporter};
