use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Reporting bucket, derived from a file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Raw,
    Redundant,
    Log,
    TimeSeries,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::Raw,
        DataType::Redundant,
        DataType::Log,
        DataType::TimeSeries,
    ];

    pub fn classify(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".log") || name.ends_with(".gz") {
            DataType::Log
        } else if name.ends_with(".bin") || name.ends_with(".meta") {
            DataType::Redundant
        } else if name.ends_with(".csv") {
            DataType::TimeSeries
        } else {
            DataType::Raw
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DataType::Raw => "Raw Data",
            DataType::Redundant => "Redundant Data",
            DataType::Log => "Log Data",
            DataType::TimeSeries => "Time-Series Data",
        }
    }

    pub fn technique(&self) -> &'static str {
        match self {
            DataType::Raw => "None",
            DataType::Redundant => "Deduplication",
            DataType::Log => "Gzip",
            DataType::TimeSeries => "Hourly Aggregation",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Default, Clone)]
pub struct TypeStats {
    pub original_bytes: u64,
    pub final_bytes: u64,
    pub cpu_secs_per_gb: Vec<f64>,
    pub latencies_ms: Vec<f64>,
}

impl TypeStats {
    /// `original / final`; infinite when everything was deleted, 1.0 with no data.
    pub fn reduction_ratio(&self) -> f64 {
        match (self.original_bytes, self.final_bytes) {
            (0, _) => 1.0,
            (_, 0) => f64::INFINITY,
            (orig, fin) => orig as f64 / fin as f64,
        }
    }

    pub fn avg_cpu_secs_per_gb(&self) -> f64 {
        mean(&self.cpu_secs_per_gb)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        mean(&self.latencies_ms)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub data_type: DataType,
    pub technique: &'static str,
    pub reduction_ratio: f64,
    pub cpu_secs_per_gb: f64,
    pub avg_latency_ms: f64,
}

/// Per data type totals for one pipeline run.
#[derive(Debug, Clone)]
pub struct SummaryReport {
    stats: BTreeMap<DataType, TypeStats>,
}

impl Default for SummaryReport {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryReport {
    pub fn new() -> Self {
        Self {
            stats: DataType::ALL
                .iter()
                .map(|t| (*t, TypeStats::default()))
                .collect(),
        }
    }

    /// Record one processed file. Zero latencies are treated as "not sampled".
    pub fn record(
        &mut self,
        path: &Path,
        original_size: u64,
        final_size: u64,
        elapsed: Duration,
        latency: Option<Duration>,
    ) {
        let stats = self.stats.entry(DataType::classify(path)).or_default();
        stats.original_bytes += original_size;
        stats.final_bytes += final_size;

        let size_gb = if original_size > 0 {
            original_size as f64 / 1e9
        } else {
            1.0
        };
        stats
            .cpu_secs_per_gb
            .push(elapsed.as_secs_f64() / size_gb);

        if let Some(latency) = latency {
            let ms = latency.as_secs_f64() * 1000.0;
            if ms > 0.0 {
                stats.latencies_ms.push(ms);
            }
        }
    }

    pub fn stats(&self, data_type: DataType) -> Option<&TypeStats> {
        self.stats.get(&data_type)
    }

    pub fn rows(&self) -> Vec<SummaryRow> {
        self.stats
            .iter()
            .map(|(data_type, stats)| SummaryRow {
                data_type: *data_type,
                technique: data_type.technique(),
                reduction_ratio: stats.reduction_ratio(),
                cpu_secs_per_gb: stats.avg_cpu_secs_per_gb(),
                avg_latency_ms: stats.avg_latency_ms(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(DataType::classify(Path::new("d/app.log")), DataType::Log);
        assert_eq!(DataType::classify(Path::new("d/app.log.gz")), DataType::Log);
        assert_eq!(DataType::classify(Path::new("d/r1.bin")), DataType::Redundant);
        assert_eq!(DataType::classify(Path::new("d/r1.bin.meta")), DataType::Redundant);
        assert_eq!(DataType::classify(Path::new("d/sensor.csv")), DataType::TimeSeries);
        assert_eq!(DataType::classify(Path::new("d/raw.dat")), DataType::Raw);
        assert_eq!(DataType::classify(Path::new("d/README")), DataType::Raw);
    }

    #[test]
    fn test_reduction_ratio_edges() {
        let none = TypeStats::default();
        assert_eq!(none.reduction_ratio(), 1.0);

        let deleted = TypeStats {
            original_bytes: 100,
            final_bytes: 0,
            ..Default::default()
        };
        assert!(deleted.reduction_ratio().is_infinite());

        let halved = TypeStats {
            original_bytes: 100,
            final_bytes: 50,
            ..Default::default()
        };
        assert_eq!(halved.reduction_ratio(), 2.0);
    }

    #[test]
    fn test_record_and_rows() {
        let mut report = SummaryReport::new();
        report.record(
            Path::new("a.log"),
            2_000_000_000,
            500_000_000,
            Duration::from_secs(4),
            Some(Duration::from_millis(2)),
        );
        report.record(
            Path::new("b.log"),
            1_000_000_000,
            500_000_000,
            Duration::from_secs(1),
            Some(Duration::ZERO),
        );

        let log = report.stats(DataType::Log).unwrap();
        assert_eq!(log.reduction_ratio(), 3.0);
        assert_eq!(log.avg_cpu_secs_per_gb(), 1.5);
        assert_eq!(log.latencies_ms.len(), 1);

        let rows = report.rows();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].data_type, DataType::Raw);
        assert_eq!(rows[2].data_type, DataType::Log);
        assert_eq!(rows[2].technique, "Gzip");
    }
}
