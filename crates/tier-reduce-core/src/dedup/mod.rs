pub mod chunk_store;
pub mod engine;
pub mod hash_index;
pub mod metadata;

pub use chunk_store::{hash_chunk, ChunkStore};
pub use engine::{DedupEngine, DedupOutcome, DEFAULT_CHUNK_SIZE};
pub use hash_index::HashIndex;
pub use metadata::{metadata_path_for, original_path_for, FileMetadata};
