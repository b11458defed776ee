// Workflow registry - versions and publishes workflow DSL documents
// (spec §3, §4.1 "Versioning & rollback"). Grounded on `rules::deployment`'s
// sibling draft/active/deprecated lifecycle, itself reused from the
// teacher's versioned-document idiom.

use dashmap::DashMap;
use std::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::models::workflow::{VersionState, Workflow, WorkflowDsl, WorkflowVersion};
use crate::models::WorkflowId;

struct WorkflowState {
    workflow: Workflow,
    versions: Vec<WorkflowVersion>,
}

/// Owns the live `workflows` + `workflow_versions` collections (spec §6).
pub struct WorkflowRegistry {
    workflows: DashMap<String, Mutex<WorkflowState>>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        WorkflowRegistry {
            workflows: DashMap::new(),
        }
    }

    /// Creates a new workflow with its first version already active, so the
    /// engine can `start` it immediately without a separate publish step.
    pub fn create(&self, tenant_id: impl Into<String>, name: impl Into<String>, dsl: WorkflowDsl) -> Result<Workflow> {
        dsl.validate()?;
        let workflow = Workflow::new(tenant_id, name, dsl.clone());
        let mut version = WorkflowVersion::new(workflow.id.clone(), workflow.version, dsl);
        version.state = VersionState::Active;

        let key = workflow.id.as_str().to_string();
        self.workflows.insert(
            key,
            Mutex::new(WorkflowState {
                workflow: workflow.clone(),
                versions: vec![version],
            }),
        );
        Ok(workflow)
    }

    /// `create_version(workflow_id, dsl) -> version`, starting in `draft`.
    pub fn create_version(&self, workflow_id: &WorkflowId, dsl: WorkflowDsl) -> Result<u32> {
        dsl.validate()?;
        let entry = self
            .workflows
            .get(workflow_id.as_str())
            .ok_or_else(|| CoreError::NotFound(format!("workflow {workflow_id}")))?;
        let mut state = entry.lock().expect("workflow state lock");
        let version = state.versions.last().map(|v| v.version + 1).unwrap_or(1);
        state
            .versions
            .push(WorkflowVersion::new(workflow_id.clone(), version, dsl));
        Ok(version)
    }

    /// Publishing flips the previous active version to `deprecated` and
    /// copies the new version's dsl into the live workflow row.
    pub fn publish(&self, workflow_id: &WorkflowId, version: u32) -> Result<()> {
        let entry = self
            .workflows
            .get(workflow_id.as_str())
            .ok_or_else(|| CoreError::NotFound(format!("workflow {workflow_id}")))?;
        let mut state = entry.lock().expect("workflow state lock");
        let dsl = state
            .versions
            .iter()
            .find(|v| v.version == version)
            .map(|v| v.dsl.clone())
            .ok_or_else(|| CoreError::VersionNotFound {
                workflow_id: workflow_id.to_string(),
                version,
            })?;

        for v in state.versions.iter_mut() {
            if v.state == VersionState::Active {
                v.state = VersionState::Deprecated;
            }
        }
        if let Some(v) = state.versions.iter_mut().find(|v| v.version == version) {
            v.state = VersionState::Active;
        }
        state.workflow.with_dsl(version, dsl);
        Ok(())
    }

    /// Loads `target_version`'s dsl back into the live workflow row,
    /// updating `version` — the workflow-level rollback operation (not to be
    /// confused with the rule-deployment rollback in `rules::deployment`).
    /// Fails with `VersionNotFound` if the target doesn't exist.
    pub fn rollback(&self, workflow_id: &WorkflowId, target_version: u32) -> Result<(u32, u32)> {
        let entry = self
            .workflows
            .get(workflow_id.as_str())
            .ok_or_else(|| CoreError::NotFound(format!("workflow {workflow_id}")))?;
        let mut state = entry.lock().expect("workflow state lock");
        let from_version = state.workflow.version;
        let dsl = state
            .versions
            .iter()
            .find(|v| v.version == target_version)
            .map(|v| v.dsl.clone())
            .ok_or_else(|| CoreError::VersionNotFound {
                workflow_id: workflow_id.to_string(),
                version: target_version,
            })?;

        for v in state.versions.iter_mut() {
            if v.state == VersionState::Active {
                v.state = VersionState::Deprecated;
            }
        }
        if let Some(v) = state.versions.iter_mut().find(|v| v.version == target_version) {
            v.state = VersionState::Active;
        }
        state.workflow.with_dsl(target_version, dsl);
        Ok((from_version, target_version))
    }

    pub fn get(&self, workflow_id: &WorkflowId) -> Result<Workflow> {
        self.workflows
            .get(workflow_id.as_str())
            .map(|e| e.lock().expect("workflow state lock").workflow.clone())
            .ok_or_else(|| CoreError::NotFound(format!("workflow {workflow_id}")))
    }

    /// The active version's dsl, or `NotActive` if the workflow has none
    /// (e.g. every version was rolled back past or none was ever published).
    pub fn active_version_dsl(&self, workflow_id: &WorkflowId) -> Result<(u32, WorkflowDsl)> {
        let entry = self
            .workflows
            .get(workflow_id.as_str())
            .ok_or_else(|| CoreError::NotFound(format!("workflow {workflow_id}")))?;
        let state = entry.lock().expect("workflow state lock");
        state
            .versions
            .iter()
            .find(|v| v.state == VersionState::Active)
            .map(|v| (v.version, v.dsl.clone()))
            .ok_or_else(|| CoreError::NotActive {
                workflow_id: workflow_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::{Node, NodeType};
    use crate::models::NodeId;

    fn dsl(version: u32) -> WorkflowDsl {
        WorkflowDsl {
            name: "temp-escalation".into(),
            version,
            trigger: None,
            deadline_ms: None,
            nodes: vec![Node {
                id: NodeId::from("n1"),
                node_type: NodeType::Data,
                config: serde_json::json!({}),
                next: vec![],
                retry_policy: None,
                compensable: false,
            }],
        }
    }

    #[test]
    fn new_workflow_is_immediately_active() {
        let registry = WorkflowRegistry::new();
        let wf = registry.create("tenant-a", "Temp Escalation", dsl(1)).unwrap();
        let (version, _) = registry.active_version_dsl(&wf.id).unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn publish_promotes_draft_and_demotes_prior_active() {
        let registry = WorkflowRegistry::new();
        let wf = registry.create("tenant-a", "Temp Escalation", dsl(1)).unwrap();
        let v2 = registry.create_version(&wf.id, dsl(2)).unwrap();
        registry.publish(&wf.id, v2).unwrap();
        let (active, _) = registry.active_version_dsl(&wf.id).unwrap();
        assert_eq!(active, v2);
    }

    #[test]
    fn rollback_restores_prior_version_and_reports_from_to() {
        let registry = WorkflowRegistry::new();
        let wf = registry.create("tenant-a", "Temp Escalation", dsl(1)).unwrap();
        let v2 = registry.create_version(&wf.id, dsl(2)).unwrap();
        registry.publish(&wf.id, v2).unwrap();

        let (from, to) = registry.rollback(&wf.id, 1).unwrap();
        assert_eq!((from, to), (2, 1));
        let (active, _) = registry.active_version_dsl(&wf.id).unwrap();
        assert_eq!(active, 1);
    }

    #[test]
    fn rollback_to_missing_version_fails() {
        let registry = WorkflowRegistry::new();
        let wf = registry.create("tenant-a", "Temp Escalation", dsl(1)).unwrap();
        assert!(matches!(
            registry.rollback(&wf.id, 99),
            Err(CoreError::VersionNotFound { .. })
        ));
    }
}
