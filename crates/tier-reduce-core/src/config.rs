use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_paths")]
    pub data_paths: Vec<String>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_policy_path")]
    pub policy_path: String,
    #[serde(default = "default_chunk_store_dir")]
    pub chunk_store_dir: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    #[serde(default = "default_aggregate_bucket_secs")]
    pub aggregate_bucket_secs: i64,
    #[serde(default = "default_probe_bytes")]
    pub probe_bytes: usize,
}

fn default_data_paths() -> Vec<String> {
    vec!["test_data".to_string()]
}

fn default_policy_path() -> String {
    "policy.json".to_string()
}

fn default_chunk_store_dir() -> String {
    "chunk_store".to_string()
}

fn default_chunk_size() -> usize {
    4096
}

fn default_compression_level() -> u32 {
    9
}

fn default_aggregate_bucket_secs() -> i64 {
    3600
}

fn default_probe_bytes() -> usize {
    4096
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_paths: default_data_paths(),
            ignore_patterns: Vec::new(),
            policy_path: default_policy_path(),
            chunk_store_dir: default_chunk_store_dir(),
            chunk_size: default_chunk_size(),
            compression_level: default_compression_level(),
            aggregate_bucket_secs: default_aggregate_bucket_secs(),
            probe_bytes: default_probe_bytes(),
        }
    }
}

/// Load `Config.toml` (optional) overlaid with `TIER_REDUCE_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("TIER_REDUCE")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("data_paths")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    let config = builder.try_deserialize::<AppConfig>()?;

    if config.chunk_size == 0 {
        return Err(ConfigError::Message("chunk_size must be positive".into()));
    }
    if config.compression_level > 9 {
        return Err(ConfigError::Message(format!(
            "compression_level {} out of range 0..=9",
            config.compression_level
        )));
    }
    if config.aggregate_bucket_secs <= 0 {
        return Err(ConfigError::Message(
            "aggregate_bucket_secs must be positive".into(),
        ));
    }

    Ok(config)
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        let mut should_add = true;

        // A new entry may swallow several existing ones.
        result.retain(|res_dir| !Path::new(res_dir).starts_with(dir_path) || res_dir == &dir);

        for res_dir in &result {
            if dir_path.starts_with(Path::new(res_dir)) {
                should_add = false;
                break;
            }
        }

        if should_add {
            result.push(dir);
        }
    }

    result
}
