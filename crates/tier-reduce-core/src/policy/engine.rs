use super::rule::{load_policy, ActionKind, Tier, ValidatedPolicy};
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

const SECS_PER_DAY: f64 = 24.0 * 3600.0;

/// Outcome of evaluating one file against the rule set.
///
/// Callers must check `tier` for [`Tier::Error`] before dispatching `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatus {
    pub rule: Option<String>,
    pub age_days: f64,
    pub tier: Tier,
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileStatus {
    fn errored(detail: String) -> Self {
        Self {
            rule: None,
            age_days: 0.0,
            tier: Tier::Error,
            action: ActionKind::None,
            error: Some(detail),
        }
    }

    pub fn is_error(&self) -> bool {
        self.tier == Tier::Error
    }
}

pub struct PolicyEngine {
    policy: ValidatedPolicy,
}

impl PolicyEngine {
    pub fn new(policy: ValidatedPolicy) -> Self {
        Self { policy }
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let policy = load_policy(path)?;
        info!("Policy engine initialized with policy: {}", path.display());
        Ok(Self::new(policy))
    }

    pub fn policy(&self) -> &ValidatedPolicy {
        &self.policy
    }

    /// Classify `path` given an already known modification time. Pure: no I/O.
    pub fn evaluate(&self, path: &Path, modified: SystemTime, now: SystemTime) -> FileStatus {
        let age_days = age_in_days(modified, now);
        debug!("File {}: Age {:.2} days", path.display(), age_days);

        match self.policy.first_match(path) {
            Some(rule) => {
                let (tier, action) = rule.classify(age_days);
                debug!(
                    "File {} matched rule '{}' -> tier={} action={}",
                    path.display(),
                    rule.name,
                    tier,
                    action
                );
                FileStatus {
                    rule: Some(rule.name.clone()),
                    age_days,
                    tier,
                    action,
                    error: None,
                }
            }
            None => {
                warn!("File {} did not match any rule", path.display());
                FileStatus {
                    rule: None,
                    age_days,
                    tier: Tier::Unmatched,
                    action: ActionKind::None,
                    error: None,
                }
            }
        }
    }

    /// Stat `path` and classify it. A missing or unreadable file yields
    /// `tier=error` instead of an `Err`.
    pub fn evaluate_path(&self, path: &Path, now: SystemTime) -> FileStatus {
        match stat_modified(path) {
            Ok(modified) => self.evaluate(path, modified, now),
            Err(e) => {
                error!("Error processing file {}: {}", path.display(), e);
                debug!(tier = "error", path = %path.display(), "evaluation skipped");
                FileStatus::errored(e.to_string())
            }
        }
    }
}

pub fn stat_modified(path: &Path) -> Result<SystemTime, Error> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| Error::Stat {
            path: path.to_path_buf(),
            source,
        })
}

/// Fractional days between `modified` and `now`. Negative for future mtimes.
pub fn age_in_days(modified: SystemTime, now: SystemTime) -> f64 {
    match now.duration_since(modified) {
        Ok(elapsed) => elapsed.as_secs_f64() / SECS_PER_DAY,
        Err(e) => -(e.duration().as_secs_f64() / SECS_PER_DAY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::rule::parse_policy;
    use std::time::Duration;

    const POLICY: &str = r#"{
        "rules": [
            {"name": "redundant", "path_match": "*.bin", "retention_days": 30,
             "hot_tier_days": 7, "warm_tier_days": 14,
             "warm_tier_action": "deduplicate", "cold_tier_action": "delete"},
            {"name": "logs", "path_match": "*.log", "retention_days": 90,
             "hot_tier_days": 1, "warm_tier_action": "compress",
             "cold_tier_action": "compress"},
            {"name": "catch-logs", "path_match": "*/archive/*", "retention_days": 5,
             "hot_tier_days": 1, "warm_tier_action": "delete",
             "cold_tier_action": "delete"}
        ]
    }"#;

    fn engine() -> PolicyEngine {
        PolicyEngine::new(parse_policy(POLICY).unwrap())
    }

    fn days(d: f64) -> Duration {
        Duration::from_secs_f64(d * SECS_PER_DAY)
    }

    fn eval(engine: &PolicyEngine, path: &str, age: f64) -> FileStatus {
        let now = SystemTime::UNIX_EPOCH + days(1000.0);
        engine.evaluate(Path::new(path), now - days(age), now)
    }

    #[test]
    fn test_warm_cold_expired_scenario() {
        let engine = engine();

        let warm = eval(&engine, "data/redundant1.bin", 10.0);
        assert_eq!(warm.tier, Tier::Warm);
        assert_eq!(warm.action, ActionKind::Deduplicate);
        assert_eq!(warm.rule.as_deref(), Some("redundant"));

        let cold = eval(&engine, "data/redundant1.bin", 25.0);
        assert_eq!(cold.tier, Tier::Cold);
        assert_eq!(cold.action, ActionKind::Delete);

        let expired = eval(&engine, "data/redundant1.bin", 31.0);
        assert_eq!(expired.tier, Tier::Expired);
        assert_eq!(expired.action, ActionKind::Delete);
    }

    #[test]
    fn test_exact_hot_boundary_is_hot() {
        let status = eval(&engine(), "x.bin", 7.0);
        assert_eq!(status.tier, Tier::Hot);
        assert_eq!(status.action, ActionKind::None);
    }

    #[test]
    fn test_exact_retention_boundary_is_not_expired() {
        let status = eval(&engine(), "x.bin", 30.0);
        assert_eq!(status.tier, Tier::Cold);
    }

    #[test]
    fn test_age_is_fractional() {
        let status = eval(&engine(), "x.bin", 7.25);
        assert!((status.age_days - 7.25).abs() < 1e-9);
        assert_eq!(status.tier, Tier::Warm);
    }

    #[test]
    fn test_first_match_wins() {
        // Matches both "logs" and "catch-logs"; document order picks "logs".
        let status = eval(&engine(), "srv/archive/app.log", 10.0);
        assert_eq!(status.rule.as_deref(), Some("logs"));
        assert_eq!(status.tier, Tier::Warm);
        assert_eq!(status.action, ActionKind::Compress);
    }

    #[test]
    fn test_star_crosses_directories() {
        let status = eval(&engine(), "deep/nested/dir/trace.log", 0.5);
        assert_eq!(status.rule.as_deref(), Some("logs"));
        assert_eq!(status.tier, Tier::Hot);
    }

    #[test]
    fn test_unmatched_fails_open() {
        let status = eval(&engine(), "notes.txt", 400.0);
        assert_eq!(status.tier, Tier::Unmatched);
        assert_eq!(status.action, ActionKind::None);
        assert!(status.rule.is_none());
        assert!(status.error.is_none());
    }

    #[test]
    fn test_future_mtime_is_hot() {
        let now = SystemTime::UNIX_EPOCH + days(10.0);
        let status = engine().evaluate(Path::new("a.bin"), now + days(1.0), now);
        assert!(status.age_days < 0.0);
        assert_eq!(status.tier, Tier::Hot);
    }

    #[test]
    fn test_missing_file_reports_error_tier() {
        let status = engine().evaluate_path(
            Path::new("/no/such/dir/ghost.bin"),
            SystemTime::now(),
        );
        assert_eq!(status.tier, Tier::Error);
        assert_eq!(status.action, ActionKind::None);
        assert!(status.error.is_some());
        assert!(status.is_error());
    }

    #[test]
    fn test_status_serializes_stable_field_names() {
        let status = eval(&engine(), "x.bin", 10.0);
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["tier"], "warm");
        assert_eq!(value["action"], "deduplicate");
        assert_eq!(value["rule"], "redundant");
        assert!(value.get("age_days").is_some());
        assert!(value.get("error").is_none());
    }
}
