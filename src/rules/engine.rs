// Rules engine - evaluates a compiled rule script against structured input,
// producing a per-class confidence vector. Grounded directly on the
// teacher's `RulesEngine`/`RuleCondition` evaluator in `engine/rules.rs`,
// generalized from boolean transition-gating to judgment confidence output.
//
// The rule-script's own language is an excluded external collaborator
// (spec §1); this engine treats `RuleScript::source` as a JSON array of
// structured [`Rule`] definitions (see `RuleScript::compile`), which is the
// Open Question resolution recorded in DESIGN.md.

use crate::error::{CoreError, Result};
use crate::models::judgment::{ConfidenceVector, Decision};
use crate::models::rule::{Rule, RuleScript};

/// Result of evaluating a compiled rule script against one input.
#[derive(Debug, Clone)]
pub struct RuleEvaluation {
    pub decision: Decision,
    pub confidence: f64,
    pub vector: ConfidenceVector,
    pub matched_rule_ids: Vec<String>,
    pub rule_trace: Vec<String>,
}

#[derive(Default)]
pub struct RulesEngine;

impl RulesEngine {
    pub fn new() -> Self {
        RulesEngine
    }

    /// Parses opaque rule-script source into structured rules. The source is
    /// expected to be a JSON array of `Rule` objects; anything else is a
    /// `CompileError`, matching spec §7's error kind for unexecutable
    /// ruleset source.
    pub fn compile(source: &str) -> Result<Vec<Rule>> {
        serde_json::from_str::<Vec<Rule>>(source)
            .map_err(|e| CoreError::CompileError(format!("rule script parse error: {e}")))
    }

    /// Evaluates every rule in `script` against `input`. A rule "matches"
    /// when its condition evaluates true; each matching rule contributes its
    /// confidence to its decision class, taking the maximum contribution per
    /// class when multiple rules agree. If nothing matches, the result is
    /// `unknown` with confidence 0.0 (rule-derived: "no evidence found").
    pub fn execute(&self, script: &RuleScript, input: &serde_json::Value) -> RuleEvaluation {
        let mut vector = ConfidenceVector::new(0.0, 0.0, 0.0);
        let mut matched_rule_ids = Vec::new();
        let mut rule_trace = Vec::new();

        for rule in &script.rules {
            let matched = rule.condition.evaluate(input);
            rule_trace.push(format!(
                "{}: {} ({})",
                rule.id,
                if matched { "matched" } else { "no match" },
                rule.description
            ));
            if !matched {
                continue;
            }
            matched_rule_ids.push(rule.id.clone());
            match rule.decision {
                Decision::Normal => vector.normal = vector.normal.max(rule.confidence),
                Decision::Warning => vector.warning = vector.warning.max(rule.confidence),
                Decision::Critical => vector.critical = vector.critical.max(rule.confidence),
                Decision::Unknown => {}
            }
        }

        if matched_rule_ids.is_empty() {
            return RuleEvaluation {
                decision: Decision::Unknown,
                confidence: 0.0,
                vector,
                matched_rule_ids,
                rule_trace,
            };
        }

        let (decision, confidence) = vector.argmax();
        RuleEvaluation {
            decision,
            confidence,
            vector,
            matched_rule_ids,
            rule_trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rule::RuleCondition;
    use crate::models::{CompileStatus, RulesetId};

    fn script(rules: Vec<Rule>) -> RuleScript {
        RuleScript {
            ruleset_id: RulesetId::from("line-a-temp"),
            version: 1,
            source: String::new(),
            digest: String::new(),
            compile_status: CompileStatus::Compiled,
            rules,
            changelog: String::new(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn no_matching_rule_yields_unknown() {
        let engine = RulesEngine::new();
        let eval = engine.execute(&script(vec![]), &serde_json::json!({"temperature": 20}));
        assert_eq!(eval.decision, Decision::Unknown);
        assert_eq!(eval.confidence, 0.0);
    }

    #[test]
    fn s1_temperature_escalate_scenario_rule_side() {
        // DSL: DATA -> JUDGMENT(escalate) -> ACTION(notify). Input
        // {line: "A", temperature: 81}, ruleset decides warning at 0.6
        // (spec §8 S1).
        let engine = RulesEngine::new();
        let rules = vec![Rule {
            id: "r-warn-temp".into(),
            description: "temperature above warning threshold".into(),
            condition: RuleCondition::FieldGreaterThan {
                field: "temperature".into(),
                threshold: 75.0,
            },
            decision: Decision::Warning,
            confidence: 0.6,
        }];
        let eval = engine.execute(&script(rules), &serde_json::json!({"line": "A", "temperature": 81}));
        assert_eq!(eval.decision, Decision::Warning);
        assert_eq!(eval.confidence, 0.6);
        assert_eq!(eval.matched_rule_ids, vec!["r-warn-temp".to_string()]);
    }

    #[test]
    fn compile_rejects_non_json_source() {
        assert!(RulesEngine::compile("not json").is_err());
    }

    #[test]
    fn compile_accepts_rule_array_json() {
        let source = serde_json::to_string(&vec![Rule {
            id: "r1".into(),
            description: "d".into(),
            condition: RuleCondition::FieldExists { field: "x".into() },
            decision: Decision::Normal,
            confidence: 0.9,
        }])
        .unwrap();
        let rules = RulesEngine::compile(&source).unwrap();
        assert_eq!(rules.len(), 1);
    }
}
