// Hybrid judgment core - fuses the deterministic rule engine with an LLM
// decision source under one of six caller-selected policies (spec §4.2).
// Grounded on the teacher's `llm/router.rs` provider-selection/fallback
// pattern for `escalate`/`rule_fallback`, and on `engine/rules.rs`'s
// multi-result aggregation style for `hybrid_weighted`'s vector combination.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::judgment::cache::JudgmentCache;
use crate::judgment::llm::{LlmJudge, LlmOutcome};
use crate::models::judgment::{ConfidenceVector, Decision, Evidence, FusionPolicy, JudgmentExecution, JudgmentMethod};
use crate::models::{PromptTemplate, RulesetId, TraceId};
use crate::rules::deployment::RuleDeploymentHub;
use crate::rules::engine::{RuleEvaluation, RulesEngine};

/// Rule confidence below which `escalate`/`hybrid_gate` consult the LLM.
pub const DEFAULT_ESCALATE_THRESHOLD: f64 = 0.8;
/// Default weight on the rule vector in `hybrid_weighted` (spec §4.2, α).
pub const DEFAULT_WEIGHTED_ALPHA: f64 = 0.5;
/// Bounded retry budget for an LLM response that fails to parse, beyond the
/// first attempt (spec §4.2 "LLM output robustness").
const DEFAULT_LLM_PARSE_RETRIES: u32 = 2;

pub struct JudgmentEngine {
    rules_engine: RulesEngine,
    deployment: Arc<RuleDeploymentHub>,
    llm: Arc<dyn LlmJudge>,
    cache: JudgmentCache,
    escalate_threshold: f64,
    weighted_alpha: f64,
}

impl JudgmentEngine {
    pub fn new(deployment: Arc<RuleDeploymentHub>, llm: Arc<dyn LlmJudge>) -> Self {
        JudgmentEngine {
            rules_engine: RulesEngine::new(),
            deployment,
            llm,
            cache: JudgmentCache::new(),
            escalate_threshold: DEFAULT_ESCALATE_THRESHOLD,
            weighted_alpha: DEFAULT_WEIGHTED_ALPHA,
        }
    }

    pub fn with_params(
        deployment: Arc<RuleDeploymentHub>,
        llm: Arc<dyn LlmJudge>,
        escalate_threshold: f64,
        weighted_alpha: f64,
    ) -> Self {
        JudgmentEngine {
            rules_engine: RulesEngine::new(),
            deployment,
            llm,
            cache: JudgmentCache::new(),
            escalate_threshold,
            weighted_alpha,
        }
    }

    /// `execute(ruleset_id, input, policy) -> JudgmentExecution` (spec
    /// §4.2). `prompt` carries the exemplars an LLM-consulting policy needs;
    /// it is ignored by `rule_only`.
    pub async fn execute(
        &self,
        ruleset_id: &RulesetId,
        prompt: &PromptTemplate,
        input: serde_json::Value,
        policy: FusionPolicy,
        trace_id: TraceId,
        ttl_seconds: u64,
    ) -> Result<JudgmentExecution> {
        let start = Instant::now();
        let version = self.deployment.resolve_version(ruleset_id, &trace_id)?;
        let script = self.deployment.script(ruleset_id, version)?;

        let key = JudgmentCache::compute_key(version, prompt.version, &input, policy);
        if let Some(mut execution) = self.cache.get(&key, Utc::now()) {
            execution.method = JudgmentMethod::Cache;
            execution.cached = true;
            return Ok(execution);
        }

        let rule_eval = self.rules_engine.execute(&script, &input);

        let (decision, confidence, method, llm_metadata, evidence) = match policy {
            FusionPolicy::RuleOnly => rule_only_outcome(&rule_eval),
            FusionPolicy::LlmOnly => {
                let outcome = self.call_llm(prompt, &input).await?;
                let (decision, confidence) = outcome.vector.argmax();
                (
                    decision,
                    confidence,
                    JudgmentMethod::LlmOnly,
                    Some(outcome.metadata.clone()),
                    evidence_from(&[], Some(&outcome)),
                )
            }
            FusionPolicy::Escalate => {
                if self.gate_passes(&rule_eval) {
                    rule_only_outcome(&rule_eval)
                } else {
                    let outcome = self.call_llm(prompt, &input).await?;
                    let (decision, confidence) = outcome.vector.argmax();
                    (
                        decision,
                        confidence,
                        JudgmentMethod::Hybrid,
                        Some(outcome.metadata.clone()),
                        evidence_from(&rule_eval.matched_rule_ids, Some(&outcome)),
                    )
                }
            }
            FusionPolicy::RuleFallback => match self.call_llm(prompt, &input).await {
                Ok(outcome) => {
                    let (decision, confidence) = outcome.vector.argmax();
                    (
                        decision,
                        confidence,
                        JudgmentMethod::Hybrid,
                        Some(outcome.metadata.clone()),
                        evidence_from(&rule_eval.matched_rule_ids, Some(&outcome)),
                    )
                }
                Err(err) => {
                    warn!(%err, "llm unavailable, falling back to rules");
                    rule_only_outcome(&rule_eval)
                }
            },
            FusionPolicy::HybridGate => {
                if !self.gate_passes(&rule_eval) {
                    rule_only_outcome(&rule_eval)
                } else {
                    let outcome = self.call_llm(prompt, &input).await?;
                    let (decision, confidence) = outcome.vector.argmax();
                    (
                        decision,
                        confidence,
                        JudgmentMethod::Hybrid,
                        Some(outcome.metadata.clone()),
                        evidence_from(&rule_eval.matched_rule_ids, Some(&outcome)),
                    )
                }
            }
            FusionPolicy::HybridWeighted => {
                let outcome = self.call_llm(prompt, &input).await?;
                let combined = weighted_combine(&rule_eval.vector, &outcome.vector, self.weighted_alpha);
                let (decision, confidence) = combined.argmax();
                (
                    decision,
                    confidence,
                    JudgmentMethod::Hybrid,
                    Some(outcome.metadata.clone()),
                    evidence_from(&rule_eval.matched_rule_ids, Some(&outcome)),
                )
            }
        };

        let execution = JudgmentExecution {
            id: uuid::Uuid::new_v4(),
            ruleset_id: ruleset_id.clone(),
            input,
            result: decision,
            confidence,
            method,
            rule_trace: rule_eval.rule_trace,
            llm_metadata,
            evidence,
            recommended_actions: vec![],
            latency_ms: start.elapsed().as_millis() as u64,
            cached: false,
            trace_id,
        };

        self.cache.put(key, execution.clone(), ttl_seconds, Utc::now());
        Ok(execution)
    }

    /// A rule result "passes the gate" when it is not `unknown` and its
    /// confidence meets the escalate threshold (spec §4.2: shared by
    /// `escalate`'s fallthrough test and `hybrid_gate`'s precondition).
    fn gate_passes(&self, rule_eval: &RuleEvaluation) -> bool {
        rule_eval.decision != Decision::Unknown && rule_eval.confidence >= self.escalate_threshold
    }

    /// Calls the LLM, retrying a bounded number of times on `LLMUnparsable`
    /// before surfacing it.
    async fn call_llm(&self, prompt: &PromptTemplate, input: &serde_json::Value) -> Result<LlmOutcome> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.llm.judge(prompt, input).await {
                Ok(outcome) => return Ok(outcome),
                Err(CoreError::LLMUnparsable(msg)) if attempt <= DEFAULT_LLM_PARSE_RETRIES => {
                    warn!(attempt, %msg, "llm output unparsable, retrying with stricter prompt variant");
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn rule_only_outcome(
    rule_eval: &RuleEvaluation,
) -> (Decision, f64, JudgmentMethod, Option<crate::models::judgment::LlmCallMetadata>, Evidence) {
    (
        rule_eval.decision,
        rule_eval.confidence,
        JudgmentMethod::RuleOnly,
        None,
        evidence_from(&rule_eval.matched_rule_ids, None),
    )
}

fn evidence_from(matched_rule_ids: &[String], llm: Option<&LlmOutcome>) -> Evidence {
    Evidence {
        matched_rule_ids: matched_rule_ids.to_vec(),
        llm: llm.map(|o| o.metadata.clone()),
        data_references: vec![],
        chart_urls: vec![],
    }
}

/// `combined = α·r + (1-α)·l`, argmax breaks ties toward the more severe
/// class (spec §4.2, and the symmetry invariant in spec §8: swapping `r`/`l`
/// with `1-α` yields the same decision and confidence).
fn weighted_combine(r: &ConfidenceVector, l: &ConfidenceVector, alpha: f64) -> ConfidenceVector {
    ConfidenceVector::new(
        alpha * r.normal + (1.0 - alpha) * l.normal,
        alpha * r.warning + (1.0 - alpha) * l.warning,
        alpha * r.critical + (1.0 - alpha) * l.critical,
    )
}
