// Tool provider registry records - grounded on the teacher's
// `FunctionDefinition`/`FunctionStorage` pattern in `engine/functions.rs`,
// generalized from Docker-triggered functions to on-demand provider calls.

use serde::{Deserialize, Serialize};

use crate::models::ids::ToolProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http,
    Grpc,
    /// A "data-source-backed" provider synthesizes tools from a registered
    /// external-system binding (spec §4.3) rather than a static manifest.
    DataSourceBacked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub scheme: String,
    #[serde(default)]
    pub credential_ref: Option<String>,
}

/// One tool a provider advertises: `{name, input_schema, output_schema}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
}

/// `{id, endpoint, protocol, auth, breaker_state, fail_count}` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProvider {
    pub id: ToolProviderId,
    pub endpoint: String,
    pub protocol: Protocol,
    pub auth: AuthConfig,
    pub breaker_state: BreakerState,
    pub fail_count: u32,
    pub tools: Vec<Tool>,
}

/// A registration request for a new provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProviderSpec {
    pub endpoint: String,
    pub protocol: Protocol,
    pub auth: AuthConfig,
    pub tools: Vec<Tool>,
}
