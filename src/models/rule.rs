// Rule condition trees and the versioned ruleset/deployment records.
//
// Grounded on the teacher's `models/rule.rs` `RuleCondition` tagged-union
// evaluator, generalized from boolean transition-gating to a condition tree
// that contributes a per-class confidence vote (see `rules::engine`).

use serde::{Deserialize, Serialize};

use crate::models::ids::RulesetId;

/// A single evaluatable condition, structurally identical in spirit to the
/// teacher's `RuleCondition` (tagged union, `Box` to break enum recursion).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuleCondition {
    FieldExists {
        field: String,
    },
    FieldEquals {
        field: String,
        value: serde_json::Value,
    },
    FieldGreaterThan {
        field: String,
        threshold: f64,
    },
    FieldLessThan {
        field: String,
        threshold: f64,
    },
    And {
        rules: Vec<RuleCondition>,
    },
    Or {
        rules: Vec<RuleCondition>,
    },
    Not {
        rule: Box<RuleCondition>,
    },
}

impl RuleCondition {
    pub fn evaluate(&self, input: &serde_json::Value) -> bool {
        match self {
            RuleCondition::FieldExists { field } => input.get(field).is_some(),
            RuleCondition::FieldEquals { field, value } => {
                input.get(field).map(|v| v == value).unwrap_or(false)
            }
            RuleCondition::FieldGreaterThan { field, threshold } => input
                .get(field)
                .and_then(|v| v.as_f64())
                .map(|v| v > *threshold)
                .unwrap_or(false),
            RuleCondition::FieldLessThan { field, threshold } => input
                .get(field)
                .and_then(|v| v.as_f64())
                .map(|v| v < *threshold)
                .unwrap_or(false),
            RuleCondition::And { rules } => rules.iter().all(|r| r.evaluate(input)),
            RuleCondition::Or { rules } => rules.iter().any(|r| r.evaluate(input)),
            RuleCondition::Not { rule } => !rule.evaluate(input),
        }
    }

    /// Flat set of `(field, discriminant)` pairs this condition touches, used
    /// by `detect_conflicts`'s overlap metric. `discriminant` distinguishes
    /// an equality check on a field from a threshold check on the same
    /// field, so overlap is measured on predicates, not just field names.
    pub fn predicate_fingerprints(&self) -> Vec<String> {
        match self {
            RuleCondition::FieldExists { field } => vec![format!("{field}:exists")],
            RuleCondition::FieldEquals { field, value } => {
                vec![format!("{field}:eq:{value}")]
            }
            RuleCondition::FieldGreaterThan { field, .. } => vec![format!("{field}:gt")],
            RuleCondition::FieldLessThan { field, .. } => vec![format!("{field}:lt")],
            RuleCondition::And { rules } | RuleCondition::Or { rules } => rules
                .iter()
                .flat_map(|r| r.predicate_fingerprints())
                .collect(),
            RuleCondition::Not { rule } => rule.predicate_fingerprints(),
        }
    }
}

/// One rule: a matched condition that votes for a [`crate::models::judgment::Decision`]
/// with a confidence, carried as part of a [`RuleScript`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub description: String,
    pub condition: RuleCondition,
    pub decision: crate::models::judgment::Decision,
    pub confidence: f64,
}

/// Compile status of a [`RuleScript`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStatus {
    Pending,
    Compiled,
    Failed,
}

/// Opaque source text + digest + compile status — one entry in a ruleset's
/// monotonically increasing version stream (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleScript {
    pub ruleset_id: RulesetId,
    pub version: u32,
    pub source: String,
    pub digest: String,
    pub compile_status: CompileStatus,
    pub rules: Vec<Rule>,
    pub changelog: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Optional canary parameters on a [`RuleDeployment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryParams {
    pub fraction: f64,
    pub target_filter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Active,
    Canary,
    Deprecated,
}

/// A deployment record pinning one ruleset version to active or canary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDeployment {
    pub id: uuid::Uuid,
    pub ruleset_id: RulesetId,
    pub version: u32,
    pub state: DeploymentState,
    pub canary: Option<CanaryParams>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// One finding from `detect_conflicts`: two rules whose conditions overlap
/// heavily but whose actions disagree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConflict {
    pub rule_a: String,
    pub rule_b: String,
    pub overlap: f64,
    pub decision_a: crate::models::judgment::Decision,
    pub decision_b: crate::models::judgment::Decision,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::judgment::Decision;

    #[test]
    fn field_greater_than_evaluates_numeric_threshold() {
        let cond = RuleCondition::FieldGreaterThan {
            field: "temperature".into(),
            threshold: 80.0,
        };
        assert!(cond.evaluate(&serde_json::json!({"temperature": 81})));
        assert!(!cond.evaluate(&serde_json::json!({"temperature": 79})));
    }

    #[test]
    fn and_requires_all_subconditions() {
        let cond = RuleCondition::And {
            rules: vec![
                RuleCondition::FieldExists {
                    field: "line".into(),
                },
                RuleCondition::FieldGreaterThan {
                    field: "temperature".into(),
                    threshold: 80.0,
                },
            ],
        };
        assert!(cond.evaluate(&serde_json::json!({"line": "A", "temperature": 81})));
        assert!(!cond.evaluate(&serde_json::json!({"temperature": 81})));
    }

    #[test]
    fn predicate_fingerprints_are_flat_and_order_stable() {
        let cond = RuleCondition::And {
            rules: vec![
                RuleCondition::FieldExists {
                    field: "line".into(),
                },
                RuleCondition::FieldGreaterThan {
                    field: "temperature".into(),
                    threshold: 80.0,
                },
            ],
        };
        assert_eq!(
            cond.predicate_fingerprints(),
            vec!["line:exists".to_string(), "temperature:gt".to_string()]
        );
    }

    #[test]
    fn rule_carries_decision_and_confidence() {
        let rule = Rule {
            id: "r1".into(),
            description: "high temp".into(),
            condition: RuleCondition::FieldGreaterThan {
                field: "temperature".into(),
                threshold: 80.0,
            },
            decision: Decision::Warning,
            confidence: 0.6,
        };
        assert!(rule.condition.evaluate(&serde_json::json!({"temperature": 81})));
        assert_eq!(rule.decision, Decision::Warning);
    }
}
