pub mod walk;

pub use walk::{build_file_size_map, collect_files};
