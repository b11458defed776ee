// Judgment result cache - content-addressed by ruleset/prompt version plus
// canonicalized input and policy (spec §4.2). Grounded on the teacher's
// `DashMap`-backed registries (e.g. `engine/functions.rs`) for lock-free
// concurrent reads, generalized to a TTL-expiring entry store.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::models::judgment::{FusionPolicy, JudgmentCacheEntry, JudgmentExecution};

/// Recursively reorders JSON object keys so two semantically identical
/// inputs that differ only in field order hash to the same cache key.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let ordered: BTreeMap<String, serde_json::Value> =
                map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            serde_json::Value::Object(ordered.into_iter().collect())
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Stores [`JudgmentCacheEntry`] records keyed by the hash described in
/// spec §4.2, plus the full [`JudgmentExecution`] each entry references.
pub struct JudgmentCache {
    entries: DashMap<String, JudgmentCacheEntry>,
    executions: DashMap<uuid::Uuid, JudgmentExecution>,
}

impl Default for JudgmentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JudgmentCache {
    pub fn new() -> Self {
        JudgmentCache {
            entries: DashMap::new(),
            executions: DashMap::new(),
        }
    }

    /// `key = hash(ruleset_version ∥ prompt_version ∥ canonicalized_input ∥ policy)`.
    /// Because the ruleset/prompt versions are baked into the key, a
    /// publish/rollback naturally invalidates stale entries lazily: no
    /// explicit eviction sweep is needed (spec §4.2).
    pub fn compute_key(
        ruleset_version: u32,
        prompt_version: u32,
        input: &serde_json::Value,
        policy: FusionPolicy,
    ) -> String {
        let canon = canonicalize(input);
        let mut hasher = Sha256::new();
        hasher.update(ruleset_version.to_le_bytes());
        hasher.update(prompt_version.to_le_bytes());
        hasher.update(canon.to_string().as_bytes());
        hasher.update(format!("{policy:?}").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns a hit's referenced execution if the entry is still valid,
    /// incrementing its hit count. Returns `None` on miss or expiry.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<JudgmentExecution> {
        let mut entry = self.entries.get_mut(key)?;
        if !entry.is_valid(now) {
            return None;
        }
        entry.hit_count += 1;
        self.executions.get(&entry.execution_id).map(|e| e.clone())
    }

    /// Stores a freshly computed execution under `key` with the given TTL.
    pub fn put(&self, key: String, execution: JudgmentExecution, ttl_seconds: u64, now: DateTime<Utc>) {
        let entry = JudgmentCacheEntry {
            key: key.clone(),
            execution_id: execution.id,
            ttl_seconds,
            expires_at: now + chrono::Duration::seconds(ttl_seconds as i64),
            hit_count: 0,
        };
        self.executions.insert(execution.id, execution);
        self.entries.insert(key, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::judgment::{Decision, JudgmentMethod};
    use crate::models::{RulesetId, TraceId};

    fn sample_execution() -> JudgmentExecution {
        JudgmentExecution {
            id: uuid::Uuid::new_v4(),
            ruleset_id: RulesetId::from("line-a"),
            input: serde_json::json!({"temperature": 81}),
            result: Decision::Warning,
            confidence: 0.6,
            method: JudgmentMethod::RuleOnly,
            rule_trace: vec![],
            llm_metadata: None,
            evidence: Default::default(),
            recommended_actions: vec![],
            latency_ms: 1,
            cached: false,
            trace_id: TraceId::from("t1"),
        }
    }

    #[test]
    fn key_is_insensitive_to_object_field_order() {
        let a = serde_json::json!({"line": "A", "temperature": 81});
        let b = serde_json::json!({"temperature": 81, "line": "A"});
        let ka = JudgmentCache::compute_key(1, 1, &a, FusionPolicy::RuleOnly);
        let kb = JudgmentCache::compute_key(1, 1, &b, FusionPolicy::RuleOnly);
        assert_eq!(ka, kb);
    }

    #[test]
    fn hit_within_ttl_then_miss_after_expiry() {
        let cache = JudgmentCache::new();
        let now = Utc::now();
        let key = JudgmentCache::compute_key(1, 1, &serde_json::json!({"x": 1}), FusionPolicy::LlmOnly);
        cache.put(key.clone(), sample_execution(), 300, now);

        let hit = cache.get(&key, now + chrono::Duration::seconds(299));
        assert!(hit.is_some());

        let miss = cache.get(&key, now + chrono::Duration::seconds(301));
        assert!(miss.is_none());
    }

    #[test]
    fn hit_count_increments_on_each_read() {
        let cache = JudgmentCache::new();
        let now = Utc::now();
        let key = JudgmentCache::compute_key(2, 3, &serde_json::json!({"x": 1}), FusionPolicy::HybridWeighted);
        cache.put(key.clone(), sample_execution(), 300, now);

        cache.get(&key, now).unwrap();
        cache.get(&key, now).unwrap();
        assert_eq!(cache.entries.get(&key).unwrap().hit_count, 2);
    }
}
