// Node dispatch contracts (spec §4.1 table). Each dispatcher resolves its
// node's config against the runtime context and returns either a value to
// bind at `nodes[id].result` plus the chosen successor ids, or a signal for
// the engine to suspend the instance. `PARALLEL` and `LOOP` are handled by
// the engine's run loop directly (they need to spawn/iterate sub-chains);
// every other type is dispatched here.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{CoreError, Result};
use crate::judgment::JudgmentEngine;
use crate::learning::PromptStore;
use crate::models::instance::RuntimeContext;
use crate::models::workflow::Node;
use crate::models::{FusionPolicy, NodeId, PromptTemplateId, RulesetId, ToolProviderId, TraceId};
use crate::rules::RuleDeploymentHub;
use crate::tools::ToolHub;

/// Outcome of dispatching one node, from the engine run loop's perspective.
pub enum DispatchOutcome {
    /// Bind `value` at this node's result slot and continue to `next`.
    Completed { value: serde_json::Value, next: Vec<NodeId> },
    /// WAIT/APPROVAL: suspend the instance; the caller decides when the
    /// condition is satisfied and calls `resume`/`approve`.
    Suspend,
}

/// CODE node body execution. The sandbox a code body runs in is an external
/// collaborator the core does not specify (spec §4.1); this only fixes the
/// boundary, grounded on `judgment::llm::LlmJudge`'s opaque-callable shape.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, body: &str, bindings: serde_json::Value) -> Result<serde_json::Value>;
}

/// A scripted code runner for tests/local development, keyed by body text.
pub struct MockCodeRunner {
    scripted: RwLock<HashMap<String, Result<serde_json::Value>>>,
    delays: RwLock<HashMap<String, std::time::Duration>>,
}

impl Default for MockCodeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCodeRunner {
    pub fn new() -> Self {
        MockCodeRunner {
            scripted: RwLock::new(HashMap::new()),
            delays: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_response(&self, body: &str, response: Result<serde_json::Value>) {
        self.scripted.write().await.insert(body.to_string(), response);
    }

    /// Makes `body` sleep before returning its scripted response, for tests
    /// that need branches to finish at distinct, known times.
    pub async fn set_delay(&self, body: &str, delay: std::time::Duration) {
        self.delays.write().await.insert(body.to_string(), delay);
    }
}

fn clone_result(result: &Result<serde_json::Value>) -> Result<serde_json::Value> {
    match result {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(CoreError::Internal(e.to_string())),
    }
}

#[async_trait]
impl CodeRunner for MockCodeRunner {
    async fn run(&self, body: &str, _bindings: serde_json::Value) -> Result<serde_json::Value> {
        if let Some(delay) = self.delays.read().await.get(body).copied() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.scripted.read().await;
        match scripted.get(body) {
            Some(result) => clone_result(result),
            None => Err(CoreError::InvalidInput(format!("no scripted code result for body: {body}"))),
        }
    }
}

/// Runs a declared compensator for one previously-completed, compensable
/// node (spec §4.1 COMPENSATION). The compensation implementation (undo a
/// DB write, cancel an MES order, …) is caller-defined.
#[async_trait]
pub trait Compensator: Send + Sync {
    async fn compensate(&self, node: &Node, runtime_context: &RuntimeContext) -> Result<serde_json::Value>;
}

/// The default compensator: records that compensation ran without taking
/// any external action, used when no real compensator is wired up.
pub struct NoopCompensator;

#[async_trait]
impl Compensator for NoopCompensator {
    async fn compensate(&self, node: &Node, _runtime_context: &RuntimeContext) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "compensated_node": node.id.as_str(), "noop": true }))
    }
}

/// The engine's out-of-process collaborators, bundled for dispatch (spec
/// §1's "external collaborators" plus the core's own sibling subsystems).
/// Cheap to clone: every field is an `Arc`, which the run loop relies on to
/// hand each PARALLEL branch its own owned handle.
#[derive(Clone)]
pub struct EngineDeps {
    pub tool_hub: Arc<ToolHub>,
    pub judgment_engine: Arc<JudgmentEngine>,
    pub rule_deployment: Arc<RuleDeploymentHub>,
    pub prompt_store: Arc<PromptStore>,
    pub code_runner: Arc<dyn CodeRunner>,
    pub compensator: Arc<dyn Compensator>,
}

/// Recursively resolves embedded `$.scope.path` string references inside a
/// config value against the runtime context, leaving everything else as-is.
/// This is what spec §4.1 calls a "templated" input (DATA's query, ACTION's
/// parameters, …): any string happening to start with `$.` is substituted.
pub fn resolve_templated(ctx: &RuntimeContext, raw: &serde_json::Value) -> Result<serde_json::Value> {
    match raw {
        serde_json::Value::String(s) if s.starts_with("$.") => ctx.resolve(s),
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_templated(ctx, v)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
            items.iter().map(|v| resolve_templated(ctx, v)).collect::<Result<Vec<_>>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn config_str(node: &Node, field: &str) -> Result<String> {
    node.config
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| CoreError::InvalidInput(format!("node {}: missing config.{field}", node.id)))
}

fn config_value(node: &Node, field: &str) -> serde_json::Value {
    node.config.get(field).cloned().unwrap_or(serde_json::Value::Null)
}

/// Dispatches every node type except `PARALLEL` and `LOOP`, which the run
/// loop handles directly so it can spawn/iterate sub-chains.
pub async fn dispatch_node(
    node: &Node,
    ctx: &mut RuntimeContext,
    deps: &EngineDeps,
    trace_id: &TraceId,
) -> Result<DispatchOutcome> {
    use crate::models::workflow::NodeType;

    let value = match node.node_type {
        NodeType::Data => {
            let connector = config_str(node, "connector")?;
            let query = resolve_templated(ctx, &config_value(node, "query"))?;
            let provider_id = ToolProviderId::from(connector);
            let tool_name = config_str(node, "tool_name").unwrap_or_else(|_| "query".to_string());
            deps.tool_hub.call(&provider_id, &tool_name, query).await?
        }
        NodeType::Bi => {
            let provider_id = ToolProviderId::from(config_str(node, "provider_id")?);
            let plan = resolve_templated(ctx, &config_value(node, "query_plan"))?;
            deps.tool_hub.call(&provider_id, "run_query_plan", plan).await?
        }
        NodeType::Mcp => {
            let provider_id = ToolProviderId::from(config_str(node, "provider_id")?);
            let tool_name = config_str(node, "tool_name")?;
            let args = resolve_templated(ctx, &config_value(node, "args"))?;
            deps.tool_hub.call(&provider_id, &tool_name, args).await?
        }
        NodeType::Action => {
            let provider_id = ToolProviderId::from(config_str(node, "provider_id")?);
            let tool_name = config_str(node, "tool_name").unwrap_or_else(|_| "deliver".to_string());
            let mut params = resolve_templated(ctx, &config_value(node, "parameters"))?;
            if let Some(key) = node.config.get("idempotency_key").and_then(|v| v.as_str()) {
                if let Some(obj) = params.as_object_mut() {
                    obj.insert("idempotency_key".to_string(), serde_json::json!(key));
                }
            }
            deps.tool_hub.call(&provider_id, &tool_name, params).await?
        }
        NodeType::Code => {
            let body = config_str(node, "body")?;
            let bindings = resolve_templated(ctx, &config_value(node, "bindings"))?;
            deps.code_runner.run(&body, bindings).await?
        }
        NodeType::Judgment => {
            let ruleset_id = RulesetId::from(config_str(node, "ruleset_id")?);
            let prompt_template_id = PromptTemplateId::from(config_str(node, "prompt_template_id")?);
            let policy: FusionPolicy =
                serde_json::from_value(config_value(node, "policy")).map_err(|e| {
                    CoreError::InvalidInput(format!("node {}: invalid policy: {e}", node.id))
                })?;
            let input = resolve_templated(ctx, &config_value(node, "input"))?;
            let ttl_seconds = node.config.get("ttl_seconds").and_then(|v| v.as_u64()).unwrap_or(300);
            let prompt = deps.prompt_store.get(&prompt_template_id)?;

            let execution = deps
                .judgment_engine
                .execute(&ruleset_id, &prompt, input, policy, trace_id.clone(), ttl_seconds)
                .await?;
            serde_json::to_value(&execution)?
        }
        NodeType::Switch => {
            let value_ref = config_str(node, "value_ref")?;
            let actual = ctx.resolve(&value_ref)?;
            let cases = node.config.get("cases").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            let mut chosen = None;
            for (i, case) in cases.iter().enumerate() {
                if *case == actual {
                    chosen = node.next.get(i).cloned();
                    break;
                }
            }
            let next = chosen.or_else(|| node.next.last().cloned()).into_iter().collect::<Vec<_>>();
            return Ok(DispatchOutcome::Completed {
                value: serde_json::json!({ "matched": actual }),
                next,
            });
        }
        NodeType::IfElse => {
            let condition_ref = config_str(node, "condition_ref")?;
            let cond = ctx.resolve(&condition_ref)?.as_bool().unwrap_or(false);
            let next = if cond {
                node.next.first().cloned()
            } else {
                node.next.get(1).cloned()
            };
            return Ok(DispatchOutcome::Completed {
                value: serde_json::json!({ "condition": cond }),
                next: next.into_iter().collect(),
            });
        }
        NodeType::Condition => {
            let expression_ref = config_str(node, "expression_ref")?;
            let cond = ctx.resolve(&expression_ref)?.as_bool().unwrap_or(false);
            let next = if cond { node.next.clone() } else { vec![] };
            return Ok(DispatchOutcome::Completed {
                value: serde_json::json!(cond),
                next,
            });
        }
        NodeType::Trigger => {
            info!(node_id = %node.id, "trigger registered, not awaiting downstream");
            resolve_templated(ctx, &config_value(node, "event_spec"))?
        }
        NodeType::Wait => {
            let has_duration = node.config.get("duration_ms").and_then(|v| v.as_u64()).is_some();
            let has_event = node.config.get("event_ref").and_then(|v| v.as_str()).is_some();
            if !has_duration && !has_event {
                return Err(CoreError::InvalidInput(format!(
                    "node {}: WAIT requires config.duration_ms or config.event_ref",
                    node.id
                )));
            }
            return Ok(DispatchOutcome::Suspend);
        }
        NodeType::Approval => {
            let approvers_nonempty = node
                .config
                .get("approvers")
                .and_then(|v| v.as_array())
                .map(|a| !a.is_empty())
                .unwrap_or(false);
            if !approvers_nonempty {
                return Err(CoreError::InvalidInput(format!(
                    "node {}: APPROVAL requires a non-empty config.approvers",
                    node.id
                )));
            }
            return Ok(DispatchOutcome::Suspend);
        }
        NodeType::Compensation => {
            let targets = node
                .config
                .get("targets")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let mut results = Vec::new();
            for target in targets.iter().rev() {
                let target_id = NodeId::from(target.as_str().unwrap_or_default().to_string());
                results.push(serde_json::json!({ "target": target_id.as_str() }));
                let _ = deps.compensator.compensate(node, ctx).await?;
            }
            serde_json::json!({ "compensated": results })
        }
        NodeType::Deploy => {
            let ruleset_id = RulesetId::from(config_str(node, "ruleset_id")?);
            let version = node
                .config
                .get("version")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| CoreError::InvalidInput(format!("node {}: missing config.version", node.id)))?
                as u32;
            let canary = node
                .config
                .get("canary")
                .map(|v| serde_json::from_value(v.clone()))
                .transpose()?;
            let deployment_id = deps.rule_deployment.publish(&ruleset_id, version, canary)?;
            serde_json::json!({ "deployment_id": deployment_id })
        }
        NodeType::Rollback => {
            let ruleset_id = RulesetId::from(config_str(node, "ruleset_id")?);
            let to_version = node
                .config
                .get("to_version")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| CoreError::InvalidInput(format!("node {}: missing config.to_version", node.id)))?
                as u32;
            deps.rule_deployment.rollback(&ruleset_id, to_version)?;
            serde_json::json!({ "rolled_back_to": to_version })
        }
        NodeType::Simulate => {
            let scenario = resolve_templated(ctx, &config_value(node, "scenario"))?;
            serde_json::json!({ "synthetic": true, "scenario": scenario })
        }
        NodeType::Parallel | NodeType::Loop => {
            return Err(CoreError::Internal(format!(
                "node {} ({:?}) must be handled by the run loop, not dispatch_node",
                node.id, node.node_type
            )));
        }
    };

    Ok(DispatchOutcome::Completed {
        value,
        next: node.next.clone(),
    })
}
