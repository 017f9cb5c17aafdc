use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Failed to load policy {path}: {reason}")]
    PolicyLoad { path: PathBuf, reason: String },

    #[error("Invalid policy: {0}")]
    PolicyValidation(String),

    #[error("Cannot stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write chunk {hash}: {source}")]
    StorageWrite {
        hash: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("Metadata error in {path}: {reason}")]
    Metadata { path: PathBuf, reason: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Aggregation error: {0}")]
    Aggregate(String),

    #[error("{0}")]
    Other(String),
}
