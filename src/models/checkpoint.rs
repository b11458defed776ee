// Durable checkpoints - the source of truth an instance resumes from.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ids::NodeId;
use crate::models::instance::{InstanceState, RuntimeContext};

/// `{state, current_node, runtime_context, retry_count, next_frontier[]}`
/// written after every state transition and node completion (spec §4.1).
///
/// Checkpoints are idempotent under replay: `resume` recomputes the
/// frontier from here and re-executing a node already present in
/// `runtime_context` is forbidden — its cached result is reused instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub instance_id: Uuid,
    pub state: InstanceState,
    pub current_node: Option<NodeId>,
    pub runtime_context: RuntimeContext,
    pub retry_count: u32,
    pub next_frontier: Vec<NodeId>,
    pub written_at: chrono::DateTime<chrono::Utc>,
}

impl Checkpoint {
    pub fn new(
        instance_id: Uuid,
        state: InstanceState,
        current_node: Option<NodeId>,
        runtime_context: RuntimeContext,
        retry_count: u32,
        next_frontier: Vec<NodeId>,
    ) -> Self {
        Checkpoint {
            instance_id,
            state,
            current_node,
            runtime_context,
            retry_count,
            next_frontier,
            written_at: chrono::Utc::now(),
        }
    }
}
