// Prompt templates, exemplars and feedback - grounded on the teacher's
// `AgentPrompts` (system/user prompt templates) in `models/agent.rs`,
// extended with the exemplar list the learning/auto-tune module appends to.

use serde::{Deserialize, Serialize};

use crate::models::ids::PromptTemplateId;

/// One (input, desired output) pair appended to a template body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exemplar {
    pub input_hash: String,
    pub input: serde_json::Value,
    pub desired_output: serde_json::Value,
    pub rating: u8,
    pub added_at: chrono::DateTime<chrono::Utc>,
}

/// A versioned prompt template body plus its accumulated few-shot exemplars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: PromptTemplateId,
    pub version: u32,
    pub system_prompt: String,
    pub exemplars: Vec<Exemplar>,
}

impl PromptTemplate {
    pub fn has_exemplar(&self, input_hash: &str) -> bool {
        self.exemplars.iter().any(|e| e.input_hash == input_hash)
    }
}

/// Raw user feedback on a past judgment, the input `tune` selects from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: uuid::Uuid,
    pub prompt_template_id: PromptTemplateId,
    pub input: serde_json::Value,
    pub desired_output: serde_json::Value,
    pub rating: u8,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
