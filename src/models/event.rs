// Uniform event envelope - grounded on the teacher's `TriggerEvent` /
// `EventBus` pattern in `models/function.rs` and `engine/events.rs`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ids::{NodeId, TraceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowStateChanged,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    WorkflowRollback,
    ApprovalRequested,
}

/// `{ event_type, instance_id, node_id?, from_state?, to_state?, payload?, timestamp }`
/// (spec §3, §6). All fields the spec names for a given `event_type` are
/// folded into `payload` as a JSON object so the envelope stays uniform
/// across the log store and the pub/sub channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub instance_id: Uuid,
    pub trace_id: TraceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Set when this event is being resent on `resume` after a crash
    /// between checkpoint write and the original emit (spec §5).
    #[serde(default)]
    pub replay: bool,
}

impl Event {
    pub fn state_changed(
        instance_id: Uuid,
        trace_id: TraceId,
        from_state: &str,
        to_state: &str,
        reason: Option<&str>,
    ) -> Self {
        Event {
            event_type: EventType::WorkflowStateChanged,
            instance_id,
            trace_id,
            node_id: None,
            from_state: Some(from_state.to_string()),
            to_state: Some(to_state.to_string()),
            payload: reason.map(|r| serde_json::json!({ "reason": r })),
            timestamp: chrono::Utc::now(),
            replay: false,
        }
    }

    pub fn node_started(instance_id: Uuid, trace_id: TraceId, node_id: NodeId, node_type: &str) -> Self {
        Event {
            event_type: EventType::NodeStarted,
            instance_id,
            trace_id,
            node_id: Some(node_id),
            from_state: None,
            to_state: None,
            payload: Some(serde_json::json!({ "node_type": node_type })),
            timestamp: chrono::Utc::now(),
            replay: false,
        }
    }

    pub fn node_completed(
        instance_id: Uuid,
        trace_id: TraceId,
        node_id: NodeId,
        node_type: &str,
        duration_ms: u64,
        output: Option<serde_json::Value>,
    ) -> Self {
        Event {
            event_type: EventType::NodeCompleted,
            instance_id,
            trace_id,
            node_id: Some(node_id),
            from_state: None,
            to_state: None,
            payload: Some(serde_json::json!({
                "node_type": node_type,
                "duration_ms": duration_ms,
                "output": output,
            })),
            timestamp: chrono::Utc::now(),
            replay: false,
        }
    }

    pub fn node_failed(
        instance_id: Uuid,
        trace_id: TraceId,
        node_id: NodeId,
        node_type: &str,
        error: &str,
    ) -> Self {
        Event {
            event_type: EventType::NodeFailed,
            instance_id,
            trace_id,
            node_id: Some(node_id),
            from_state: None,
            to_state: None,
            payload: Some(serde_json::json!({ "node_type": node_type, "error": error })),
            timestamp: chrono::Utc::now(),
            replay: false,
        }
    }

    pub fn workflow_rollback(
        instance_id: Uuid,
        trace_id: TraceId,
        from_version: u32,
        to_version: u32,
    ) -> Self {
        Event {
            event_type: EventType::WorkflowRollback,
            instance_id,
            trace_id,
            node_id: None,
            from_state: None,
            to_state: None,
            payload: Some(serde_json::json!({
                "from_version": from_version,
                "to_version": to_version,
            })),
            timestamp: chrono::Utc::now(),
            replay: false,
        }
    }

    pub fn approval_requested(
        instance_id: Uuid,
        trace_id: TraceId,
        node_id: NodeId,
        approvers: Vec<String>,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Event {
            event_type: EventType::ApprovalRequested,
            instance_id,
            trace_id,
            node_id: Some(node_id),
            from_state: None,
            to_state: None,
            payload: Some(serde_json::json!({
                "approvers": approvers,
                "expires_at": expires_at,
            })),
            timestamp: chrono::Utc::now(),
            replay: false,
        }
    }

    /// `workflow:{instance_id}:events` (spec §6).
    pub fn channel_key(instance_id: Uuid) -> String {
        format!("workflow:{instance_id}:events")
    }
}
