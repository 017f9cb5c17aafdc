mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use tier_reduce_core::codec::GzipCodec;
use tier_reduce_core::report::SummaryReport;
use tier_reduce_core::rotation::{rotate_logs, RotationPolicy};
use tier_reduce_core::{AppConfig, ChunkStore, DedupEngine, HashIndex, Pipeline, PolicyEngine};
use tracing::{error, info};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match tier_reduce_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Run { fresh }) => run_pipeline(&config, fresh),
        Some(Commands::Evaluate { paths }) => run_evaluate(&config, &paths),
        Some(Commands::ValidatePolicy) => run_validate_policy(&config),
        Some(Commands::Dedup { path }) => run_dedup(&config, &path),
        Some(Commands::Restore { metadata, output }) => run_restore(&config, &metadata, &output),
        Some(Commands::Rotate {
            dir,
            rotation_days,
            compression_days,
            retention_days,
        }) => run_rotate(
            &config,
            &dir,
            RotationPolicy {
                rotation_days,
                compression_days,
                retention_days,
            },
        ),
        Some(Commands::CountChunks) => run_count_chunks(&config),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
            Ok(())
        }
        Some(Commands::ResetStore) => run_reset_store(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn run_pipeline(config: &AppConfig, fresh: bool) -> Result<()> {
    let pipeline = Pipeline::from_config(config.clone(), fresh)?;
    let reporter = CliReporter::new();
    let report = pipeline.run(&reporter)?;

    println!();
    info!(
        "Scan: {}, Reduce: {}",
        format!("{:.2}s", report.scan_duration.as_secs_f64()).green(),
        format!("{:.2}s", report.process_duration.as_secs_f64()).green(),
    );
    if report.failures > 0 {
        info!(
            "{} files failed and were left in place",
            format!("{}", report.failures).red(),
        );
    }

    print_summary(&report.summary);
    Ok(())
}

fn print_summary(summary: &SummaryReport) {
    println!();
    println!("{}", "--- Data Reduction Summary ---".bold());
    println!(
        "{:<18} {:<20} {:>16} {:>14} {:>18}",
        "Data Type".bold(),
        "Technique".bold(),
        "Reduction Ratio".bold(),
        "CPU s/GB".bold(),
        "Avg Latency (ms)".bold(),
    );
    for row in summary.rows() {
        let ratio = if row.reduction_ratio.is_infinite() {
            "inf:1".to_string()
        } else {
            format!("{:.2}:1", row.reduction_ratio)
        };
        let ratio = if row.reduction_ratio > 1.0 {
            ratio.green()
        } else {
            ratio.normal()
        };
        println!(
            "{:<18} {:<20} {:>16} {:>14.4} {:>18.4}",
            row.data_type.label().cyan(),
            row.technique,
            ratio,
            row.cpu_secs_per_gb,
            row.avg_latency_ms,
        );
    }
}

fn run_evaluate(config: &AppConfig, paths: &[std::path::PathBuf]) -> Result<()> {
    let engine = PolicyEngine::from_file(Path::new(&config.policy_path))?;
    let now = SystemTime::now();
    for path in paths {
        let status = engine.evaluate_path(path, now);
        let json = serde_json::to_string(&status)?;
        println!("{}: {}", path.display(), json);
    }
    Ok(())
}

fn run_validate_policy(config: &AppConfig) -> Result<()> {
    let engine = PolicyEngine::from_file(Path::new(&config.policy_path))?;
    let rules = engine.policy().rules();
    println!(
        "{} {} rules in {}",
        "✓".green(),
        rules.len(),
        config.policy_path
    );
    for rule in rules {
        println!(
            "  {} {} (hot {}d, warm {}d, retention {}d)",
            rule.name.cyan(),
            rule.path_match,
            rule.hot_tier_days,
            rule.warm_tier_days,
            rule.retention_days
        );
    }
    Ok(())
}

fn open_dedup(config: &AppConfig) -> Result<DedupEngine> {
    let store = Arc::new(
        ChunkStore::open(&config.chunk_store_dir)
            .with_context(|| format!("opening chunk store {}", config.chunk_store_dir))?,
    );
    let index = Arc::new(HashIndex::new());
    let known = index.rebuild_from_store(&store)?;
    info!("Loaded {} known chunks", known);
    Ok(DedupEngine::new(store, index, config.chunk_size))
}

fn run_dedup(config: &AppConfig, path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("{} is not a regular file", path.display());
    }
    let engine = open_dedup(config)?;
    let outcome = engine.deduplicate(path)?;
    info!(
        "{} -> {}: {} chunks ({} new), {} bytes saved",
        path.display(),
        outcome.metadata_path.display(),
        outcome.chunk_count,
        format!("{}", outcome.new_chunks).cyan(),
        format!("{}", outcome.saved_bytes).green(),
    );
    Ok(())
}

fn run_restore(config: &AppConfig, metadata: &Path, output: &Path) -> Result<()> {
    let engine = open_dedup(config)?;
    let bytes = engine
        .restore(metadata, output)
        .with_context(|| format!("restoring {}", metadata.display()))?;
    info!("Restored {} bytes to {}", bytes, output.display());
    Ok(())
}

fn run_rotate(config: &AppConfig, dir: &Path, policy: RotationPolicy) -> Result<()> {
    let codec = GzipCodec::new(config.compression_level, config.probe_bytes);
    let summary = rotate_logs(dir, &policy, &codec, SystemTime::now())?;
    info!(
        "Rotated {}, compressed {}, pruned {}",
        format!("{}", summary.rotated).green(),
        format!("{}", summary.compressed).green(),
        format!("{}", summary.pruned).red(),
    );
    Ok(())
}

fn run_count_chunks(config: &AppConfig) -> Result<()> {
    info!("Counting chunks in {}...", config.chunk_store_dir);
    let store = ChunkStore::open(&config.chunk_store_dir)?;
    println!("Chunk store has {} blobs", store.count()?);
    Ok(())
}

fn run_reset_store(config: &AppConfig) -> Result<()> {
    let prompt = format!(
        "Are you SURE you want to DELETE every chunk in {}?",
        config.chunk_store_dir
    );
    if !prompt_confirm(&prompt, Some(false))? {
        return Ok(());
    }
    let store = ChunkStore::open(&config.chunk_store_dir)?;
    let removed = store.clear()?;
    println!("Removed {} chunks", removed);
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
