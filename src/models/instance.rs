// Instance state machine and the four-scope runtime context.

//! # Instance & Runtime Context
//!
//! An [`Instance`] is one execution of a [`super::workflow::Workflow`]. Its
//! [`InstanceState`] is exactly one of the 15 values the workflow engine spec
//! enumerates; [`InstanceState::is_terminal`] encodes the five terminal
//! states. [`RuntimeContext`] is the keyed store nodes read from and (for
//! CODE/node results) write to, generalized from the teacher's single
//! `data: serde_json::Value` field on `Resource` into the four scopes the
//! spec requires: `global`, `input`, `nodes[node_id].result`, `vars`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::models::ids::{NodeId, TraceId, WorkflowId};

/// The 15 instance states named in the workflow engine spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Created,
    Queued,
    Running,
    Retrying,
    Waiting,
    Paused,
    Completed,
    Failed,
    Compensating,
    Compensated,
    Cancelled,
    Timeout,
    Skipped,
}

impl InstanceState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceState::Completed
                | InstanceState::Failed
                | InstanceState::Cancelled
                | InstanceState::Timeout
                | InstanceState::Compensated
        )
    }

    /// Whether `resume` is legal from this state (spec §4.1: PAUSED, WAITING,
    /// or a retryable FAILED).
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            InstanceState::Paused | InstanceState::Waiting | InstanceState::Retrying
        )
    }

    /// Validates one state-machine edge against the diagram in spec §4.1.
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        if self == next {
            return false;
        }
        matches!(
            (self, next),
            (Created, Queued)
                | (Queued, Running)
                | (Running, Retrying)
                | (Retrying, Running)
                | (Running, Waiting)
                | (Waiting, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Retrying, Failed)
                | (Failed, Compensating)
                | (Compensating, Compensated)
                | (Compensating, Failed)
                | (Running, Cancelled)
                | (Waiting, Cancelled)
                | (Paused, Cancelled)
                | (Retrying, Cancelled)
                | (Running, Timeout)
                | (Waiting, Timeout)
                | (Paused, Timeout)
                | (Retrying, Timeout)
                | (Cancelled, Compensating)
                | (Timeout, Compensating)
        )
    }
}

/// Scopes a [`RuntimeContext`] reads and writes keep separate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeContext {
    /// Immutable after instance start.
    global: serde_json::Value,
    /// Immutable after instance start.
    input: serde_json::Value,
    /// Write-once per node id.
    nodes: HashMap<String, serde_json::Value>,
    /// Mutable, user-writable by CODE nodes.
    vars: serde_json::Value,
}

impl RuntimeContext {
    pub fn new(global: serde_json::Value, input: serde_json::Value) -> Self {
        RuntimeContext {
            global,
            input,
            nodes: HashMap::new(),
            vars: serde_json::json!({}),
        }
    }

    /// Write-once: returns an error if `node_id` already has a result.
    pub fn set_node_result(&mut self, node_id: &NodeId, result: serde_json::Value) -> Result<()> {
        if self.nodes.contains_key(node_id.as_str()) {
            return Err(CoreError::Internal(format!(
                "node {node_id} result already written; completed nodes' results are never mutated"
            )));
        }
        self.nodes.insert(node_id.as_str().to_string(), result);
        Ok(())
    }

    pub fn has_node_result(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id.as_str())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn set_var(&mut self, path: &str, value: serde_json::Value) {
        set_json_path(&mut self.vars, path, value);
    }

    /// Resolve a `$.input.x` / `$.global.x` / `$.nodes.<id>.result.path` /
    /// `$.vars.x` reference against this context.
    pub fn resolve(&self, reference: &str) -> Result<serde_json::Value> {
        let rest = reference
            .strip_prefix("$.")
            .ok_or_else(|| CoreError::InvalidInput(format!("not a context reference: {reference}")))?;
        let mut parts = rest.splitn(2, '.');
        let scope = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();
        let root = match scope {
            "global" => &self.global,
            "input" => &self.input,
            "vars" => &self.vars,
            "nodes" => {
                let mut np = path.splitn(2, '.');
                let node_id = np.next().ok_or_else(|| {
                    CoreError::InvalidInput(format!("malformed nodes reference: {reference}"))
                })?;
                let sub_path = np.next().unwrap_or("");
                let node_value = self.nodes.get(node_id).ok_or_else(|| {
                    CoreError::InvalidInput(format!("no result for node {node_id} yet"))
                })?;
                return get_json_path(node_value, sub_path)
                    .ok_or_else(|| CoreError::InvalidInput(format!("path not found: {reference}")));
            }
            other => {
                return Err(CoreError::InvalidInput(format!("unknown scope: {other}")))
            }
        };
        get_json_path(root, path)
            .ok_or_else(|| CoreError::InvalidInput(format!("path not found: {reference}")))
    }
}

fn get_json_path(root: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    if path.is_empty() {
        return Some(root.clone());
    }
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn set_json_path(root: &mut serde_json::Value, path: &str, value: serde_json::Value) {
    if path.is_empty() {
        *root = value;
        return;
    }
    if !root.is_object() {
        *root = serde_json::json!({});
    }
    let mut current = root;
    let segments: Vec<&str> = path.split('.').collect();
    for segment in &segments[..segments.len() - 1] {
        let obj = current.as_object_mut().expect("coerced to object above");
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| serde_json::json!({}));
        if !current.is_object() {
            *current = serde_json::json!({});
        }
    }
    let obj = current.as_object_mut().expect("coerced to object above");
    obj.insert(segments[segments.len() - 1].to_string(), value);
}

/// One execution of a workflow (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub workflow_id: WorkflowId,
    pub version: u32,
    pub state: InstanceState,
    pub runtime_context: RuntimeContext,
    pub current_node: Option<NodeId>,
    pub trace_id: TraceId,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub retry_count: u32,
    pub parent_instance_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub error_code: Option<String>,
}

impl Instance {
    pub fn new(workflow_id: WorkflowId, version: u32, input: serde_json::Value, trace_id: TraceId) -> Self {
        Instance {
            id: Uuid::new_v4(),
            workflow_id,
            version,
            state: InstanceState::Created,
            runtime_context: RuntimeContext::new(serde_json::json!({}), input),
            current_node: None,
            trace_id,
            started_at: chrono::Utc::now(),
            ended_at: None,
            retry_count: 0,
            parent_instance_id: None,
            last_error: None,
            error_code: None,
        }
    }

    pub fn mark_terminal(&mut self, state: InstanceState) {
        self.state = state;
        self.ended_at = Some(chrono::Utc::now());
    }

    pub fn record_failure(&mut self, err: &CoreError) {
        self.last_error = Some(err.to_string());
        self.error_code = Some(err.code().to_string());
    }
}
