// LLM decision source boundary. The live model client (vendor SDK, HTTP
// gateway, on-prem inference server) is an external collaborator per spec
// §1; this crate only fixes the trait shape, grounded on the teacher's
// `LlmProviderClient`/`llm/traits.rs` request-response boundary, plus a
// scripted implementation for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{CoreError, Result};
use crate::models::judgment::{ConfidenceVector, LlmCallMetadata};
use crate::models::PromptTemplate;

/// One LLM judgment call's structured result: a per-class confidence vector
/// parsed out of the model's response, plus call metadata for the evidence
/// bundle (spec §4.2).
#[derive(Debug, Clone)]
pub struct LlmOutcome {
    pub vector: ConfidenceVector,
    pub metadata: LlmCallMetadata,
}

/// The judgment core's only dependency on an LLM: given a prompt template
/// (system prompt plus accumulated exemplars) and structured input, produce
/// a confidence vector. Implementations own parsing/retries of the raw
/// model response into [`LlmOutcome`]; `LLMUnparsable` signals the response
/// could not be coerced into the expected shape.
#[async_trait]
pub trait LlmJudge: Send + Sync {
    async fn judge(&self, prompt: &PromptTemplate, input: &serde_json::Value) -> Result<LlmOutcome>;
}

/// A scripted LLM for tests and local development: each prompt template id
/// maps to a canned outcome, optionally a sequence so a test can model
/// "first call unparsable, second call succeeds" (spec §4.2 robustness).
pub struct MockLlmJudge {
    scripted: RwLock<HashMap<String, Vec<Result<LlmOutcome>>>>,
}

impl Default for MockLlmJudge {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmJudge {
    pub fn new() -> Self {
        MockLlmJudge {
            scripted: RwLock::new(HashMap::new()),
        }
    }

    /// Queues one response, returned on the next `judge` call for this
    /// template id (FIFO). Call repeatedly to script a retry sequence.
    pub async fn push_response(&self, template_id: &str, response: Result<LlmOutcome>) {
        self.scripted
            .write()
            .await
            .entry(template_id.to_string())
            .or_default()
            .push(response);
    }
}

fn clone_result(result: &Result<LlmOutcome>) -> Result<LlmOutcome> {
    match result {
        Ok(outcome) => Ok(outcome.clone()),
        Err(e) => Err(CoreError::Internal(e.to_string())),
    }
}

#[async_trait]
impl LlmJudge for MockLlmJudge {
    async fn judge(&self, prompt: &PromptTemplate, _input: &serde_json::Value) -> Result<LlmOutcome> {
        let mut scripted = self.scripted.write().await;
        let queue = scripted
            .get_mut(prompt.id.as_str())
            .ok_or_else(|| CoreError::LLMUnavailable(format!("no scripted response for {}", prompt.id)))?;
        if queue.is_empty() {
            return Err(CoreError::LLMUnavailable(format!(
                "scripted responses exhausted for {}",
                prompt.id
            )));
        }
        // Pop from the front, but once only one response remains, leave it
        // in place so repeated calls (e.g. cache-miss re-checks) keep
        // returning the same canned outcome.
        if queue.len() > 1 {
            queue.remove(0)
        } else {
            clone_result(&queue[0])
        }
    }
}
