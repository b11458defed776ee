// Learning / Auto-Tune - turns highly rated feedback into few-shot
// exemplars on a prompt template (spec §4.5). Grounded on the teacher's
// batch-aggregation style in `engine/functions.rs`'s periodic sweep,
// generalized from a metrics rollup to a dedupe-then-rank-then-append
// pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::learning::store::{FeedbackStore, PromptStore};
use crate::models::{Exemplar, Feedback, PromptTemplateId};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TuneParams {
    pub min_rating: u8,
    pub window_days: i64,
    pub max_exemplars: usize,
}

impl Default for TuneParams {
    fn default() -> Self {
        TuneParams {
            min_rating: 4,
            window_days: 30,
            max_exemplars: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TuneSummary {
    pub prompt_template_id: PromptTemplateId,
    pub added: usize,
    pub total: usize,
}

/// Canonicalized-input hash an exemplar is deduped on — same recursive
/// key-sort approach as `judgment::cache`'s cache-key canonicalization, so
/// two feedback rows with differently ordered but equal JSON input collide.
fn input_hash(input: &serde_json::Value) -> String {
    fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let ordered: std::collections::BTreeMap<String, serde_json::Value> =
                    map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
                serde_json::Value::Object(ordered.into_iter().collect())
            }
            serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(input).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub struct Tuner {
    prompts: Arc<PromptStore>,
    feedback: Arc<FeedbackStore>,
}

impl Tuner {
    pub fn new(prompts: Arc<PromptStore>, feedback: Arc<FeedbackStore>) -> Self {
        Tuner { prompts, feedback }
    }

    /// Selects candidate exemplars without appending them: feedback with
    /// `rating >= min_rating` and age `<= window_days`, deduped by
    /// canonicalized input hash (first occurrence wins), ranked by rating
    /// descending, truncated to `max_exemplars`.
    pub fn candidates(&self, prompt_template_id: &PromptTemplateId, params: TuneParams, now: chrono::DateTime<chrono::Utc>) -> Vec<Exemplar> {
        let mut rows: Vec<Feedback> = self
            .feedback
            .for_template(prompt_template_id)
            .into_iter()
            .filter(|f| f.rating >= params.min_rating)
            .filter(|f| (now - f.created_at).num_days() <= params.window_days)
            .collect();
        rows.sort_by(|a, b| b.rating.cmp(&a.rating));

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in rows {
            let hash = input_hash(&row.input);
            if !seen.insert(hash.clone()) {
                continue;
            }
            out.push(Exemplar {
                input_hash: hash,
                input: row.input,
                desired_output: row.desired_output,
                rating: row.rating,
                added_at: now,
            });
            if out.len() >= params.max_exemplars {
                break;
            }
        }
        out
    }

    /// `tune(prompt_template_id, params) -> {added, total}`. Idempotent:
    /// re-running with the same feedback set adds nothing new because
    /// `PromptStore::append_exemplars` dedupes by `input_hash` against what
    /// is already stored, on top of this call's own dedupe pass.
    pub fn tune(
        &self,
        prompt_template_id: &PromptTemplateId,
        params: TuneParams,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<TuneSummary> {
        let candidates = self.candidates(prompt_template_id, params, now);
        let added = self.prompts.append_exemplars(prompt_template_id, candidates)?;
        let total = self.prompts.get(prompt_template_id)?.exemplars.len();
        Ok(TuneSummary {
            prompt_template_id: prompt_template_id.clone(),
            added,
            total,
        })
    }

    /// `tune_all(params) -> per-template summary`, one pass over every
    /// template with recorded feedback.
    pub fn tune_all(&self, params: TuneParams, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<TuneSummary>> {
        let mut summaries = Vec::new();
        for id in self.feedback.all_template_ids() {
            summaries.push(self.tune(&id, params, now)?);
        }
        Ok(summaries)
    }
}
