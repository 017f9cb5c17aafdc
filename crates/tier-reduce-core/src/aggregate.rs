use crate::error::Error;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const AGGREGATE_SUFFIX: &str = "_agg";

/// Time-series downsampling collaborator used for the `aggregate` action.
pub trait Aggregator: Send + Sync {
    fn aggregate(&self, path: &Path, output: &Path) -> Result<(PathBuf, u64), Error>;
}

/// `sensor.csv` -> `sensor_agg.csv`
pub fn aggregate_output_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}.csv", stem, AGGREGATE_SUFFIX))
}

pub fn is_aggregate_output(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(&format!("{}.csv", AGGREGATE_SUFFIX)))
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
struct Sample {
    timestamp: String,
    temperature: f64,
    pressure: f64,
    event_count: u64,
}

#[derive(Debug, Default)]
struct Bucket {
    samples: u64,
    temperature_sum: f64,
    pressure_sum: f64,
    event_count: u64,
}

/// Resamples `timestamp,temperature,pressure,event_count` rows into fixed
/// buckets: mean temperature, mean pressure, summed event_count.
#[derive(Debug, Clone)]
pub struct CsvAggregator {
    bucket_secs: i64,
}

impl Default for CsvAggregator {
    fn default() -> Self {
        Self::new(3600)
    }
}

impl CsvAggregator {
    pub fn new(bucket_secs: i64) -> Self {
        Self {
            bucket_secs: bucket_secs.max(1),
        }
    }

    fn collect(&self, path: &Path) -> Result<BTreeMap<i64, Bucket>, Error> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| Error::Aggregate(format!("{}: {}", path.display(), e)))?;
        let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();

        for (line, record) in reader.deserialize::<Sample>().enumerate() {
            let sample = record.map_err(|e| {
                Error::Aggregate(format!("{} row {}: {}", path.display(), line + 1, e))
            })?;
            let ts = NaiveDateTime::parse_from_str(sample.timestamp.trim(), TIMESTAMP_FORMAT)
                .map_err(|e| {
                    Error::Aggregate(format!(
                        "{} row {}: bad timestamp '{}': {}",
                        path.display(),
                        line + 1,
                        sample.timestamp,
                        e
                    ))
                })?;
            let secs = ts.and_utc().timestamp();
            let start = secs - secs.rem_euclid(self.bucket_secs);

            let bucket = buckets.entry(start).or_default();
            bucket.samples += 1;
            bucket.temperature_sum += sample.temperature;
            bucket.pressure_sum += sample.pressure;
            bucket.event_count += sample.event_count;
        }

        Ok(buckets)
    }

    fn write(&self, buckets: &BTreeMap<i64, Bucket>, output: &Path) -> Result<(), Error> {
        let to_err = |e: csv::Error| Error::Aggregate(format!("{}: {}", output.display(), e));
        let mut writer = csv::Writer::from_path(output).map_err(to_err)?;
        writer
            .write_record(["timestamp", "temperature", "pressure", "event_count"])
            .map_err(to_err)?;

        for (start, bucket) in buckets {
            let label = DateTime::<Utc>::from_timestamp(*start, 0)
                .map(|dt| dt.naive_utc().format(TIMESTAMP_FORMAT).to_string())
                .ok_or_else(|| Error::Aggregate(format!("bucket {} out of range", start)))?;
            let n = bucket.samples as f64;
            writer
                .write_record([
                    label,
                    format!("{}", bucket.temperature_sum / n),
                    format!("{}", bucket.pressure_sum / n),
                    bucket.event_count.to_string(),
                ])
                .map_err(to_err)?;
        }

        writer.flush()?;
        Ok(())
    }
}

impl Aggregator for CsvAggregator {
    fn aggregate(&self, path: &Path, output: &Path) -> Result<(PathBuf, u64), Error> {
        info!("Starting aggregation of {}", path.display());
        let buckets = self.collect(path)?;

        if let Err(e) = self.write(&buckets, output) {
            let _ = fs::remove_file(output);
            return Err(e);
        }

        let original_size = fs::metadata(path)?.len();
        let final_size = fs::metadata(output)?.len();
        info!(
            "Aggregation complete. Original: {} | Final: {} | {} buckets",
            original_size,
            final_size,
            buckets.len()
        );
        Ok((output.to_path_buf(), final_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_output_path_naming() {
        assert_eq!(
            aggregate_output_path(Path::new("data/sensor.csv")),
            PathBuf::from("data/sensor_agg.csv")
        );
        assert!(is_aggregate_output(Path::new("data/sensor_agg.csv")));
        assert!(!is_aggregate_output(Path::new("data/sensor.csv")));
    }

    #[test]
    fn test_hourly_means_and_sums() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("sensor.csv");
        fs::write(
            &input,
            "timestamp,temperature,pressure,event_count\n\
             2024-01-01 00:00:00,20,1000,1\n\
             2024-01-01 00:30:00,22,1010,2\n\
             2024-01-01 01:15:00,25,1040,7\n\
             2024-01-01 00:59:59,24,1020,3\n",
        )
        .unwrap();
        let output = aggregate_output_path(&input);

        let (path, size) = CsvAggregator::default().aggregate(&input, &output).unwrap();
        assert_eq!(path, output);
        assert_eq!(size, fs::metadata(&output).unwrap().len());
        assert!(input.exists());

        let body = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "timestamp,temperature,pressure,event_count");
        assert_eq!(lines[1], "2024-01-01 00:00:00,22,1010,6");
        assert_eq!(lines[2], "2024-01-01 01:00:00,25,1040,7");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_bad_timestamp_fails_without_output() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("broken.csv");
        fs::write(
            &input,
            "timestamp,temperature,pressure,event_count\nyesterday,1,2,3\n",
        )
        .unwrap();
        let output = aggregate_output_path(&input);

        assert!(matches!(
            CsvAggregator::default().aggregate(&input, &output),
            Err(Error::Aggregate(_))
        ));
        assert!(!output.exists());
    }

    #[test]
    fn test_header_only_input() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("empty.csv");
        fs::write(&input, "timestamp,temperature,pressure,event_count\n").unwrap();
        let output = aggregate_output_path(&input);

        CsvAggregator::default().aggregate(&input, &output).unwrap();
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "timestamp,temperature,pressure,event_count\n"
        );
    }
}
