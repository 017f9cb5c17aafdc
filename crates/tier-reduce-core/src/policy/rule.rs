use crate::error::Error;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Reduction technique applied to a file in a given tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    None,
    Compress,
    Deduplicate,
    Aggregate,
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::None => "none",
            ActionKind::Compress => "compress",
            ActionKind::Deduplicate => "deduplicate",
            ActionKind::Aggregate => "aggregate",
            ActionKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ActionKind::None),
            "compress" => Ok(ActionKind::Compress),
            "deduplicate" => Ok(ActionKind::Deduplicate),
            "aggregate" => Ok(ActionKind::Aggregate),
            "delete" => Ok(ActionKind::Delete),
            other => Err(Error::PolicyValidation(format!("unknown action '{}'", other))),
        }
    }
}

/// Lifecycle bucket a file occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
    Expired,
    Unmatched,
    Error,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
            Tier::Expired => "expired",
            Tier::Unmatched => "unmatched",
            Tier::Error => "error",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule as it appears in the policy document, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRule {
    pub name: Option<String>,
    pub path_match: Option<String>,
    pub retention_days: Option<f64>,
    pub hot_tier_days: Option<f64>,
    pub warm_tier_days: Option<f64>,
    pub warm_tier_action: Option<String>,
    pub cold_tier_action: Option<String>,
}

/// The on-disk policy document: `{ "rules": [...] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub rules: Option<Vec<RawRule>>,
}

/// A validated retention rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub path_match: String,
    pattern: Pattern,
    pub retention_days: f64,
    pub hot_tier_days: f64,
    pub warm_tier_days: f64,
    pub warm_tier_action: ActionKind,
    pub cold_tier_action: ActionKind,
}

impl Rule {
    pub fn matches(&self, path: &Path) -> bool {
        self.pattern.matches_path(path)
    }

    /// Tier math. Every comparison is strict, so an age sitting exactly on a
    /// boundary stays in the newer tier.
    pub fn classify(&self, age_days: f64) -> (Tier, ActionKind) {
        if age_days > self.retention_days {
            (Tier::Expired, ActionKind::Delete)
        } else if age_days > self.hot_tier_days + self.warm_tier_days {
            (Tier::Cold, self.cold_tier_action)
        } else if age_days > self.hot_tier_days {
            (Tier::Warm, self.warm_tier_action)
        } else {
            (Tier::Hot, ActionKind::None)
        }
    }
}

/// Immutable, ordered rule set. Document order is match priority.
#[derive(Debug, Clone)]
pub struct ValidatedPolicy {
    rules: Vec<Rule>,
}

impl ValidatedPolicy {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First rule in document order whose glob matches `path`.
    pub fn first_match(&self, path: &Path) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }
}

pub fn validate(document: PolicyDocument) -> Result<ValidatedPolicy, Error> {
    let raw_rules = document
        .rules
        .ok_or_else(|| Error::PolicyValidation("policy must contain 'rules' key".into()))?;

    if raw_rules.is_empty() {
        return Err(Error::PolicyValidation(
            "policy must contain at least one rule".into(),
        ));
    }

    let rules = raw_rules
        .into_iter()
        .map(validate_rule)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ValidatedPolicy { rules })
}

fn validate_rule(raw: RawRule) -> Result<Rule, Error> {
    let label = raw.name.clone().unwrap_or_else(|| "unknown".to_string());
    let missing =
        |key: &str| Error::PolicyValidation(format!("Rule '{}' missing required key: {}", label, key));

    let name = raw.name.clone().ok_or_else(|| missing("name"))?;
    let path_match = raw.path_match.ok_or_else(|| missing("path_match"))?;
    let retention_days = raw.retention_days.ok_or_else(|| missing("retention_days"))?;
    let hot_tier_days = raw.hot_tier_days.ok_or_else(|| missing("hot_tier_days"))?;
    let warm_tier_action = raw.warm_tier_action.ok_or_else(|| missing("warm_tier_action"))?;
    let cold_tier_action = raw.cold_tier_action.ok_or_else(|| missing("cold_tier_action"))?;

    for (key, value) in [
        ("retention_days", Some(retention_days)),
        ("hot_tier_days", Some(hot_tier_days)),
        ("warm_tier_days", raw.warm_tier_days),
    ] {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(Error::PolicyValidation(format!(
                    "Rule '{}': {} must be a finite number",
                    name, key
                )));
            }
        }
    }

    if hot_tier_days > retention_days {
        return Err(Error::PolicyValidation(format!(
            "Rule '{}': hot_tier_days ({}) cannot exceed retention_days ({})",
            name, hot_tier_days, retention_days
        )));
    }

    let warm_tier_days = raw
        .warm_tier_days
        .unwrap_or(retention_days - hot_tier_days);
    if warm_tier_days < 0.0 {
        return Err(Error::PolicyValidation(format!(
            "Rule '{}': warm_tier_days ({}) cannot be negative",
            name, warm_tier_days
        )));
    }

    let pattern = Pattern::new(&path_match).map_err(|e| {
        Error::PolicyValidation(format!(
            "Rule '{}': invalid path_match '{}': {}",
            name, path_match, e
        ))
    })?;

    let warm_tier_action = warm_tier_action.parse::<ActionKind>().map_err(|e| {
        Error::PolicyValidation(format!("Rule '{}': warm_tier_action: {}", name, e))
    })?;
    let cold_tier_action = cold_tier_action.parse::<ActionKind>().map_err(|e| {
        Error::PolicyValidation(format!("Rule '{}': cold_tier_action: {}", name, e))
    })?;

    debug!(
        "Rule '{}' validated: retention={} hot={} warm={}",
        name, retention_days, hot_tier_days, warm_tier_days
    );

    Ok(Rule {
        name,
        path_match,
        pattern,
        retention_days,
        hot_tier_days,
        warm_tier_days,
        warm_tier_action,
        cold_tier_action,
    })
}

pub fn parse_policy(json: &str) -> Result<ValidatedPolicy, Error> {
    let document: PolicyDocument =
        serde_json::from_str(json).map_err(|e| Error::PolicyValidation(e.to_string()))?;
    validate(document)
}

/// Read and validate a JSON policy file. Missing or malformed files fail fast.
pub fn load_policy(path: &Path) -> Result<ValidatedPolicy, Error> {
    let contents = fs::read_to_string(path).map_err(|e| Error::PolicyLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let document: PolicyDocument =
        serde_json::from_str(&contents).map_err(|e| Error::PolicyLoad {
            path: path.to_path_buf(),
            reason: format!("invalid JSON: {}", e),
        })?;
    let policy = validate(document)?;
    info!(
        "Policy loaded from {} with {} rules",
        path.display(),
        policy.rules().len()
    );
    Ok(policy)
}
