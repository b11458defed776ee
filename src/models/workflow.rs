// Workflow definitions - the typed node graph (DSL) and its version history.

//! # Workflow Definitions
//!
//! A [`Workflow`] is a tenant-scoped, versioned document whose `dsl` field is
//! a graph of typed [`Node`]s. Unlike the teacher's Petri-net `WorkflowDefinition`
//! (places + transitions), a workflow here is a **DAG of typed operations**
//! with cycles permitted only through `LOOP` nodes — see [`NodeType`].
//!
//! ## Digest invariant
//!
//! `digest = sha256(canonical_json(dsl))`. For a given `(id, version)` the
//! dsl is immutable once the version leaves `draft`; [`Workflow::with_dsl`]
//! recomputes the digest so callers never construct a stale one by hand.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, Result};
use crate::models::ids::{NodeId, WorkflowId};

/// The 18 node types named in the workflow DSL spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Data,
    Judgment,
    Code,
    Switch,
    IfElse,
    Loop,
    Parallel,
    Condition,
    Action,
    Bi,
    Mcp,
    Trigger,
    Wait,
    Approval,
    Compensation,
    Deploy,
    Rollback,
    Simulate,
}

/// Backoff shape for a node or workflow-level retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// `{max_attempts, backoff, initial_delay, max_delay, retry_on}` from spec §4.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Error kinds (by `CoreError::code()`) that this policy applies to.
    /// An empty list means "retry only `Transient` and `Timeout`", the
    /// default the engine falls back on when a node carries no policy.
    #[serde(default)]
    pub retry_on: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff: BackoffKind::Fixed,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            retry_on: vec!["Transient".to_string(), "Timeout".to_string()],
        }
    }
}

impl RetryPolicy {
    /// Computed delay before attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        match self.backoff {
            BackoffKind::Fixed => self.initial_delay_ms,
            BackoffKind::Exponential => {
                let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
                (self.initial_delay_ms.saturating_mul(factor)).min(self.max_delay_ms.max(self.initial_delay_ms))
            }
        }
    }

    pub fn allows(&self, error: &CoreError) -> bool {
        self.retry_on.iter().any(|k| k == error.code())
    }
}

/// A single typed step in the workflow graph.
///
/// `config` is intentionally `serde_json::Value` — its shape is per-`type`
/// and validated by the node's dispatcher at execution time, not here.
/// `next` is ordered: for `SWITCH`/`IF_ELSE` the ordering encodes branch
/// selection (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub config: serde_json::Value,
    #[serde(default)]
    pub next: Vec<NodeId>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    /// Whether a completed invocation of this node can be undone by a
    /// declared compensator during COMPENSATION handling.
    #[serde(default)]
    pub compensable: bool,
}

/// The full DSL document: `{name, version, trigger?, nodes[]}` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDsl {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub trigger: Option<serde_json::Value>,
    /// Instance-level deadline in milliseconds from `start`. Exceeding it
    /// flips the instance to TIMEOUT and runs compensation over whatever
    /// compensable nodes had already completed (spec §4.1).
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    pub nodes: Vec<Node>,
}

impl WorkflowDsl {
    /// Structural validation: unique node ids, every `next` target exists,
    /// and the graph has no cycle outside of a `LOOP` node's own body.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(CoreError::InvalidInput("dsl has no nodes".into()));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(CoreError::InvalidInput(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
        }
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        for node in &self.nodes {
            for next in &node.next {
                if !ids.contains(next.as_str()) {
                    return Err(CoreError::InvalidInput(format!(
                        "node {} references unknown next id {}",
                        node.id, next
                    )));
                }
            }
        }
        self.check_cycles()
    }

    /// DFS cycle check; a cycle is only permitted if every node on it is a
    /// `LOOP` node (the loop body is reachable and expected to revisit its
    /// own entry).
    fn check_cycles(&self) -> Result<()> {
        let by_id: HashMap<&str, &Node> =
            self.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks: HashMap<&str, Mark> =
            by_id.keys().map(|k| (*k, Mark::Unvisited)).collect();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a Node>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    let node = by_id[id];
                    if node.node_type == NodeType::Loop {
                        return Ok(());
                    }
                    return Err(CoreError::InvalidInput(format!(
                        "cycle detected through non-LOOP node {id}"
                    )));
                }
                _ => {}
            }
            marks.insert(id, Mark::InProgress);
            let node = by_id[id];
            for next in &node.next {
                visit(next.as_str(), by_id, marks)?;
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for id in by_id.keys() {
            visit(id, &by_id, &mut marks)?;
        }
        Ok(())
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// `sha256(canonical_json(dsl))`, hex-encoded.
    pub fn digest(&self) -> String {
        // serde_json's map serialization is insertion-order for our structs
        // (they're all named-field structs, not maps), which keeps the
        // digest stable across processes without a separate canonicalizer.
        let bytes = serde_json::to_vec(self).expect("WorkflowDsl always serializes");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

/// Where a workflow's version history can be in its lifecycle (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Draft,
    Active,
    Deprecated,
    Archived,
}

/// Append-only history entry for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub workflow_id: WorkflowId,
    pub version: u32,
    pub dsl: WorkflowDsl,
    pub digest: String,
    pub state: VersionState,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl WorkflowVersion {
    pub fn new(workflow_id: WorkflowId, version: u32, dsl: WorkflowDsl) -> Self {
        let digest = dsl.digest();
        WorkflowVersion {
            workflow_id,
            version,
            dsl,
            digest,
            state: VersionState::Draft,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Overall workflow visibility; soft-deletes hide but preserve history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Deleted,
}

/// The live, tenant-scoped workflow row: `{id, name, version, dsl, digest, status}`.
///
/// Invariant: `digest == sha256(canonical_json(dsl))` always holds; use
/// [`Workflow::with_dsl`] rather than assigning `dsl`/`digest` separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub tenant_id: String,
    pub name: String,
    pub version: u32,
    pub dsl: WorkflowDsl,
    pub digest: String,
    pub status: WorkflowStatus,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Workflow {
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>, dsl: WorkflowDsl) -> Self {
        let digest = dsl.digest();
        let version = dsl.version;
        Workflow {
            id: WorkflowId::from(uuid::Uuid::new_v4().to_string()),
            tenant_id: tenant_id.into(),
            name: name.into(),
            version,
            dsl,
            digest,
            status: WorkflowStatus::Active,
            deleted_at: None,
        }
    }

    /// Overwrite the live dsl/version/digest atomically — used by both
    /// `publish` (new active version) and `rollback` (prior version's dsl).
    pub fn with_dsl(&mut self, version: u32, dsl: WorkflowDsl) {
        self.digest = dsl.digest();
        self.version = version;
        self.dsl = dsl;
    }

    pub fn soft_delete(&mut self) {
        self.status = WorkflowStatus::Deleted;
        self.deleted_at = Some(chrono::Utc::now());
    }
}
