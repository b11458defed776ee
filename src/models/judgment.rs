// Judgment records - the output of the hybrid rule+LLM judgment core.

//! Mirrors the teacher's pattern of a small closed enum for decision outcome
//! (cf. `ExecutionStatus` in `models/function.rs`) plus a free-form evidence
//! bundle (JSON), since the spec leaves evidence shape open-ended beyond the
//! four required categories.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ids::{RulesetId, TraceId};

/// `{normal | warning | critical | unknown}` — severity order matters for
/// tie-breaking in `hybrid_weighted` fusion (critical > warning > normal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Unknown,
    Normal,
    Warning,
    Critical,
}

impl Decision {
    /// Severity rank used for tie-breaking: higher is more severe.
    /// `Unknown` never wins a tie against an actual class.
    pub fn severity_rank(self) -> u8 {
        match self {
            Decision::Unknown => 0,
            Decision::Normal => 1,
            Decision::Warning => 2,
            Decision::Critical => 3,
        }
    }
}

/// Which source produced a [`JudgmentExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentMethod {
    RuleOnly,
    LlmOnly,
    Hybrid,
    Cache,
}

/// The caller-selected fusion policy (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionPolicy {
    RuleOnly,
    LlmOnly,
    Escalate,
    RuleFallback,
    HybridGate,
    HybridWeighted,
}

/// LLM call metadata folded into a judgment's evidence bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmCallMetadata {
    pub model: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub cost_usd: Option<f64>,
    pub latency_ms: Option<u64>,
}

/// `{action_type, priority, target?, message?, parameters?}` — the minimal
/// recommended-action shape the design notes settle on (Open Question:
/// the exact set of shapes is data-driven upstream; we expose this generic
/// envelope and document only these fields, per spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub action_type: String,
    pub priority: u8,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// Evidence the judgment decision is grounded on. The core merges
/// contributions from rules/LLM/caller context but never fabricates entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub matched_rule_ids: Vec<String>,
    pub llm: Option<LlmCallMetadata>,
    pub data_references: Vec<String>,
    pub chart_urls: Vec<String>,
}

/// Immutable judgment record (spec §3). Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgmentExecution {
    pub id: Uuid,
    pub ruleset_id: RulesetId,
    pub input: serde_json::Value,
    pub result: Decision,
    pub confidence: f64,
    pub method: JudgmentMethod,
    pub rule_trace: Vec<String>,
    pub llm_metadata: Option<LlmCallMetadata>,
    pub evidence: Evidence,
    pub recommended_actions: Vec<RecommendedAction>,
    pub latency_ms: u64,
    pub cached: bool,
    pub trace_id: TraceId,
}

/// `{key, execution_id, ttl_seconds, expires_at, hit_count}` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgmentCacheEntry {
    pub key: String,
    pub execution_id: Uuid,
    pub ttl_seconds: u64,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub hit_count: u64,
}

impl JudgmentCacheEntry {
    pub fn is_valid(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at > now
    }
}

/// Per-class confidence vector used by fusion policies, ordered
/// `[normal, warning, critical]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceVector {
    pub normal: f64,
    pub warning: f64,
    pub critical: f64,
}

impl ConfidenceVector {
    pub fn new(normal: f64, warning: f64, critical: f64) -> Self {
        ConfidenceVector {
            normal,
            warning,
            critical,
        }
    }

    pub fn argmax(&self) -> (Decision, f64) {
        let mut best = (Decision::Normal, self.normal);
        for (d, v) in [
            (Decision::Warning, self.warning),
            (Decision::Critical, self.critical),
        ] {
            if v > best.1 || (v == best.1 && d.severity_rank() > best.0.severity_rank()) {
                best = (d, v);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_rank_orders_critical_above_warning_above_normal() {
        assert!(Decision::Critical.severity_rank() > Decision::Warning.severity_rank());
        assert!(Decision::Warning.severity_rank() > Decision::Normal.severity_rank());
        assert!(Decision::Normal.severity_rank() > Decision::Unknown.severity_rank());
    }

    #[test]
    fn argmax_breaks_ties_toward_more_severe_class() {
        let v = ConfidenceVector::new(0.5, 0.5, 0.5);
        assert_eq!(v.argmax().0, Decision::Critical);
    }

    #[test]
    fn cache_entry_validity_respects_expiry() {
        let now = chrono::Utc::now();
        let entry = JudgmentCacheEntry {
            key: "k".into(),
            execution_id: Uuid::new_v4(),
            ttl_seconds: 300,
            expires_at: now + chrono::Duration::seconds(300),
            hit_count: 0,
        };
        assert!(entry.is_valid(now));
        assert!(!entry.is_valid(now + chrono::Duration::seconds(301)));
    }
}
