pub mod engine;
pub mod rule;

pub use engine::{FileStatus, PolicyEngine};
pub use rule::{load_policy, parse_policy, validate, ActionKind, PolicyDocument, RawRule, Rule, Tier, ValidatedPolicy};
