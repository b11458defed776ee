// Rule evaluation and rule deployment/canary (spec §3, §4.4).

pub mod deployment;
pub mod engine;

pub use deployment::{RuleDeploymentHub, DEFAULT_CONFLICT_THRESHOLD};
pub use engine::{RuleEvaluation, RulesEngine};
