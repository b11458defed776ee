// External tool provider client boundary. The live network client (HTTP/gRPC
// to an MES/ERP system, an MCP server, etc.) is an external collaborator per
// spec §1; this crate only defines the trait shape, grounded on the
// teacher's `LLMProviderClient` trait boundary in `llm/traits.rs`, plus a
// deterministic in-memory implementation for tests and local development.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{CoreError, Result};
use crate::models::Tool;

pub struct HealthStatus {
    pub ok: bool,
    pub latency_ms: u64,
}

/// One external tool provider's network boundary. Implementations own their
/// own transport; the hub only ever calls through this trait.
#[async_trait]
pub trait ToolProviderClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<Tool>>;
    async fn call(&self, tool_name: &str, args: serde_json::Value) -> Result<serde_json::Value>;
    async fn health(&self) -> Result<HealthStatus>;
}

/// A scripted, deterministic provider for tests and local development: each
/// tool name maps to a canned response or a canned error, so breaker and
/// fusion-policy tests don't depend on network timing.
pub struct MockToolProvider {
    tools: Vec<Tool>,
    responses: RwLock<HashMap<String, Result<serde_json::Value>>>,
}

impl MockToolProvider {
    pub fn new(tools: Vec<Tool>) -> Self {
        MockToolProvider {
            tools,
            responses: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_response(&self, tool_name: &str, response: Result<serde_json::Value>) {
        self.responses
            .write()
            .await
            .insert(tool_name.to_string(), response);
    }
}

fn clone_result(result: &Result<serde_json::Value>) -> Result<serde_json::Value> {
    match result {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(CoreError::Internal(e.to_string())),
    }
}

#[async_trait]
impl ToolProviderClient for MockToolProvider {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(self.tools.clone())
    }

    async fn call(&self, tool_name: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
        let responses = self.responses.read().await;
        match responses.get(tool_name) {
            Some(result) => clone_result(result),
            None => Err(CoreError::SchemaMismatch(format!(
                "no scripted response for tool {tool_name}"
            ))),
        }
    }

    async fn health(&self) -> Result<HealthStatus> {
        Ok(HealthStatus {
            ok: true,
            latency_ms: 1,
        })
    }
}
