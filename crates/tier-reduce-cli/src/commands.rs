use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tier-reduce")]
#[command(about = "Policy-driven data tiering and reduction", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Evaluate and reduce every file under the configured data paths
    Run {
        /// Empty the chunk store before running. Existing .meta records in the
        /// data paths will point at deleted chunks and can no longer be restored
        #[arg(long)]
        fresh: bool,
    },
    /// Print the tier and action each path would get, as JSON
    Evaluate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Load and validate the policy file
    ValidatePolicy,
    /// Deduplicate a single file into the chunk store
    Dedup { path: PathBuf },
    /// Rebuild a file from its metadata record
    Restore { metadata: PathBuf, output: PathBuf },
    /// Rotate, compress and prune app.log in a directory
    Rotate {
        dir: PathBuf,
        #[arg(long, default_value_t = 1.0)]
        rotation_days: f64,
        #[arg(long, default_value_t = 7.0)]
        compression_days: f64,
        #[arg(long, default_value_t = 30.0)]
        retention_days: f64,
    },
    /// Display the number of blobs in the chunk store
    CountChunks,
    /// Print configuration values
    PrintConfig,
    /// Delete every blob in the chunk store (existing .meta records become unrestorable)
    ResetStore,
}
