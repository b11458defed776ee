// Rule Deployment & Canary - versions ruleset scripts, admits new versions
// in a controlled fraction, supports fast rollback (spec §4.4). Grounded on
// `models/rule.rs`'s rule-registry pattern plus the teacher's
// draft/active/deprecated lifecycle idiom already used for workflow
// versions (`models/workflow.rs`), reused here for rule scripts.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::models::rule::{CanaryParams, CompileStatus, DeploymentState, RuleConflict, RuleDeployment, RuleScript};
use crate::models::{RulesetId, TraceId};
use crate::rules::engine::RulesEngine;

/// Overlap threshold above which two rules are flagged as conflicting
/// (spec §4.4 Open Question: the metric is the Jaccard index over each
/// rule's `predicate_fingerprints()`, threshold configurable, default 0.8).
pub const DEFAULT_CONFLICT_THRESHOLD: f64 = 0.8;

struct RulesetState {
    scripts: Vec<RuleScript>,
    deployments: Vec<RuleDeployment>,
}

pub struct RuleDeploymentHub {
    rulesets: DashMap<String, Mutex<RulesetState>>,
    conflict_threshold: f64,
}

impl Default for RuleDeploymentHub {
    fn default() -> Self {
        Self::new(DEFAULT_CONFLICT_THRESHOLD)
    }
}

impl RuleDeploymentHub {
    pub fn new(conflict_threshold: f64) -> Self {
        RuleDeploymentHub {
            rulesets: DashMap::new(),
            conflict_threshold,
        }
    }

    fn state(&self, ruleset_id: &RulesetId) -> dashmap::mapref::one::Ref<'_, String, Mutex<RulesetState>> {
        self.rulesets
            .entry(ruleset_id.as_str().to_string())
            .or_insert_with(|| {
                Mutex::new(RulesetState {
                    scripts: Vec::new(),
                    deployments: Vec::new(),
                })
            });
        self.rulesets.get(ruleset_id.as_str()).expect("just inserted")
    }

    /// `create_version(ruleset_id, script, changelog) -> version`.
    pub fn create_version(
        &self,
        ruleset_id: RulesetId,
        source: String,
        changelog: String,
    ) -> Result<u32> {
        let entry = self.state(&ruleset_id);
        let mut state = entry.lock().expect("ruleset state lock");
        let version = state.scripts.last().map(|s| s.version + 1).unwrap_or(1);

        let (rules, compile_status) = match RulesEngine::compile(&source) {
            Ok(rules) => (rules, CompileStatus::Compiled),
            Err(_) => (Vec::new(), CompileStatus::Failed),
        };

        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let digest = hex::encode(hasher.finalize());

        let compiled_ok = compile_status == CompileStatus::Compiled;
        state.scripts.push(RuleScript {
            ruleset_id,
            version,
            source,
            digest,
            compile_status,
            rules,
            changelog,
            created_at: chrono::Utc::now(),
        });

        if !compiled_ok {
            return Err(CoreError::CompileError(format!(
                "ruleset version {version} failed to compile; remains draft"
            )));
        }
        Ok(version)
    }

    /// `publish(ruleset_id, version, canary?) -> deployment_id`.
    ///
    /// A draft that fails to compile remains draft and can never be
    /// published; the currently active version is never disturbed
    /// (spec §4.4 failure semantics).
    pub fn publish(
        &self,
        ruleset_id: &RulesetId,
        version: u32,
        canary: Option<CanaryParams>,
    ) -> Result<uuid::Uuid> {
        let entry = self.state(ruleset_id);
        let mut state = entry.lock().expect("ruleset state lock");

        let script = state
            .scripts
            .iter()
            .find(|s| s.version == version)
            .ok_or_else(|| CoreError::VersionNotFound {
                workflow_id: ruleset_id.to_string(),
                version,
            })?;
        if script.compile_status != CompileStatus::Compiled {
            return Err(CoreError::CompileError(format!(
                "version {version} did not compile; publish refused"
            )));
        }

        if let Some(ref params) = canary {
            let existing_fraction: f64 = state
                .deployments
                .iter()
                .filter(|d| d.state == DeploymentState::Canary)
                .filter_map(|d| d.canary.as_ref().map(|c| c.fraction))
                .sum();
            if existing_fraction + params.fraction > 1.0 {
                return Err(CoreError::InvalidInput(format!(
                    "canary fractions would sum to {:.2}, exceeding 1.0",
                    existing_fraction + params.fraction
                )));
            }
        } else {
            for d in state.deployments.iter_mut() {
                if d.state == DeploymentState::Active {
                    d.state = DeploymentState::Deprecated;
                }
            }
        }

        let deployment = RuleDeployment {
            id: uuid::Uuid::new_v4(),
            ruleset_id: ruleset_id.clone(),
            version,
            state: if canary.is_some() {
                DeploymentState::Canary
            } else {
                DeploymentState::Active
            },
            canary,
            created_at: chrono::Utc::now(),
        };
        let id = deployment.id;
        state.deployments.push(deployment);
        Ok(id)
    }

    /// `rollback(ruleset_id, to_version)`: demotes the current active
    /// deployment to deprecated and re-activates `to_version`. Allowed as
    /// long as the target version exists and hasn't been archived (this
    /// implementation never archives versions, so existence is sufficient).
    pub fn rollback(&self, ruleset_id: &RulesetId, to_version: u32) -> Result<()> {
        let entry = self.state(ruleset_id);
        let mut state = entry.lock().expect("ruleset state lock");

        if !state.scripts.iter().any(|s| s.version == to_version) {
            return Err(CoreError::VersionNotFound {
                workflow_id: ruleset_id.to_string(),
                version: to_version,
            });
        }

        for d in state.deployments.iter_mut() {
            if d.state == DeploymentState::Active {
                d.state = DeploymentState::Deprecated;
            }
        }
        state.deployments.push(RuleDeployment {
            id: uuid::Uuid::new_v4(),
            ruleset_id: ruleset_id.clone(),
            version: to_version,
            state: DeploymentState::Active,
            canary: None,
            created_at: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Deterministic canary-vs-active routing keyed by trace id (spec
    /// §4.4): hash the trace id into `[0, 1)` and route to the first canary
    /// whose cumulative fraction window contains it, else the active
    /// version.
    pub fn resolve_version(&self, ruleset_id: &RulesetId, trace_id: &TraceId) -> Result<u32> {
        let entry = self.state(ruleset_id);
        let state = entry.lock().expect("ruleset state lock");

        let active = state
            .deployments
            .iter()
            .find(|d| d.state == DeploymentState::Active)
            .ok_or_else(|| CoreError::RulesetMissing(ruleset_id.to_string()))?;

        let key = trace_fraction(trace_id);
        let mut cumulative = 0.0;
        for d in state.deployments.iter().filter(|d| d.state == DeploymentState::Canary) {
            if let Some(params) = &d.canary {
                cumulative += params.fraction;
                if key < cumulative {
                    return Ok(d.version);
                }
            }
        }
        Ok(active.version)
    }

    pub fn script(&self, ruleset_id: &RulesetId, version: u32) -> Result<RuleScript> {
        let entry = self.state(ruleset_id);
        let state = entry.lock().expect("ruleset state lock");
        state
            .scripts
            .iter()
            .find(|s| s.version == version)
            .cloned()
            .ok_or_else(|| CoreError::VersionNotFound {
                workflow_id: ruleset_id.to_string(),
                version,
            })
    }

    /// `detect_conflicts(ruleset_id) -> conflict[]`: flags rule pairs (within
    /// the active version's script) whose predicate fingerprints overlap
    /// (Jaccard index) at or above `conflict_threshold` while their
    /// decisions disagree.
    pub fn detect_conflicts(&self, ruleset_id: &RulesetId) -> Result<Vec<RuleConflict>> {
        let entry = self.state(ruleset_id);
        let state = entry.lock().expect("ruleset state lock");
        let active = state
            .deployments
            .iter()
            .find(|d| d.state == DeploymentState::Active)
            .ok_or_else(|| CoreError::RulesetMissing(ruleset_id.to_string()))?;
        let script = state
            .scripts
            .iter()
            .find(|s| s.version == active.version)
            .ok_or_else(|| CoreError::VersionNotFound {
                workflow_id: ruleset_id.to_string(),
                version: active.version,
            })?;

        let mut conflicts = Vec::new();
        for i in 0..script.rules.len() {
            for j in (i + 1)..script.rules.len() {
                let a = &script.rules[i];
                let b = &script.rules[j];
                if a.decision == b.decision {
                    continue;
                }
                let overlap = jaccard_overlap(&a.condition.predicate_fingerprints(), &b.condition.predicate_fingerprints());
                if overlap >= self.conflict_threshold {
                    conflicts.push(RuleConflict {
                        rule_a: a.id.clone(),
                        rule_b: b.id.clone(),
                        overlap,
                        decision_a: a.decision,
                        decision_b: b.decision,
                    });
                }
            }
        }
        Ok(conflicts)
    }
}

fn jaccard_overlap(a: &[String], b: &[String]) -> f64 {
    use std::collections::HashSet;
    let sa: HashSet<&String> = a.iter().collect();
    let sb: HashSet<&String> = b.iter().collect();
    if sa.is_empty() && sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    intersection as f64 / union as f64
}

/// Maps a trace id deterministically into `[0, 1)` via its digest's leading
/// bytes, so the same trace always routes to the same canary/active split.
fn trace_fraction(trace_id: &TraceId) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(trace_id.as_str().as_bytes());
    let digest = hasher.finalize();
    let v = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (v as f64) / (u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::judgment::Decision;
    use crate::models::rule::Rule;

    fn rule_source(decision: Decision, field: &str) -> String {
        serde_json::to_string(&vec![Rule {
            id: format!("r-{field}"),
            description: "test rule".into(),
            condition: crate::models::RuleCondition::FieldExists { field: field.into() },
            decision,
            confidence: 0.9,
        }])
        .unwrap()
    }

    #[test]
    fn create_version_starts_at_one_and_increments() {
        let hub = RuleDeploymentHub::default();
        let rid = RulesetId::from("line-a");
        let v1 = hub
            .create_version(rid.clone(), rule_source(Decision::Warning, "temperature"), "init".into())
            .unwrap();
        let v2 = hub
            .create_version(rid.clone(), rule_source(Decision::Critical, "pressure"), "v2".into())
            .unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
    }

    #[test]
    fn failed_compile_leaves_active_untouched() {
        let hub = RuleDeploymentHub::default();
        let rid = RulesetId::from("line-a");
        let v1 = hub
            .create_version(rid.clone(), rule_source(Decision::Warning, "temperature"), "init".into())
            .unwrap();
        hub.publish(&rid, v1, None).unwrap();

        let bad_version_result = hub.create_version(rid.clone(), "not json".into(), "broken".into());
        assert!(bad_version_result.is_err());

        // Active deployment should still resolve to v1.
        let trace = TraceId::from("trace-1");
        assert_eq!(hub.resolve_version(&rid, &trace).unwrap(), v1);
    }

    #[test]
    fn s4_rollback_restores_prior_version() {
        let hub = RuleDeploymentHub::default();
        let rid = RulesetId::from("line-a");
        let v1 = hub
            .create_version(rid.clone(), rule_source(Decision::Warning, "temperature"), "init".into())
            .unwrap();
        let v2 = hub
            .create_version(rid.clone(), rule_source(Decision::Critical, "pressure"), "v2".into())
            .unwrap();
        hub.publish(&rid, v1, None).unwrap();
        hub.publish(&rid, v2, None).unwrap();

        hub.rollback(&rid, v1).unwrap();
        let trace = TraceId::from("trace-1");
        assert_eq!(hub.resolve_version(&rid, &trace).unwrap(), v1);
    }

    #[test]
    fn canary_fractions_cannot_exceed_one() {
        let hub = RuleDeploymentHub::default();
        let rid = RulesetId::from("line-a");
        let v1 = hub
            .create_version(rid.clone(), rule_source(Decision::Warning, "temperature"), "init".into())
            .unwrap();
        let v2 = hub
            .create_version(rid.clone(), rule_source(Decision::Critical, "pressure"), "v2".into())
            .unwrap();
        hub.publish(&rid, v1, None).unwrap();
        hub.publish(
            &rid,
            v2,
            Some(CanaryParams {
                fraction: 0.6,
                target_filter: None,
            }),
        )
        .unwrap();

        let v3 = hub
            .create_version(rid.clone(), rule_source(Decision::Normal, "humidity"), "v3".into())
            .unwrap();
        let result = hub.publish(
            &rid,
            v3,
            Some(CanaryParams {
                fraction: 0.5,
                target_filter: None,
            }),
        );
        assert!(result.is_err());
    }

    #[test]
    fn detect_conflicts_flags_overlapping_disagreeing_rules() {
        let hub = RuleDeploymentHub::new(0.8);
        let rid = RulesetId::from("line-a");
        let source = serde_json::to_string(&vec![
            Rule {
                id: "r1".into(),
                description: "d1".into(),
                condition: crate::models::RuleCondition::FieldGreaterThan {
                    field: "temperature".into(),
                    threshold: 80.0,
                },
                decision: Decision::Warning,
                confidence: 0.6,
            },
            Rule {
                id: "r2".into(),
                description: "d2".into(),
                condition: crate::models::RuleCondition::FieldGreaterThan {
                    field: "temperature".into(),
                    threshold: 80.0,
                },
                decision: Decision::Normal,
                confidence: 0.5,
            },
        ])
        .unwrap();
        let v1 = hub.create_version(rid.clone(), source, "init".into()).unwrap();
        hub.publish(&rid, v1, None).unwrap();

        let conflicts = hub.detect_conflicts(&rid).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].overlap, 1.0);
    }
}
