// Tool Hub / Proxy - mediates every external-tool call through a uniform
// interface guarded by a per-provider circuit breaker (spec §4.3). Grounded
// on the teacher's `engine/functions.rs` execution-engine shape (a
// registry keyed by id, `Arc<RwLock<_>>` around mutable per-entry state),
// generalized from Docker-triggered functions to synchronous tool calls.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::models::{AuthConfig, BreakerState, Protocol, Tool, ToolProvider, ToolProviderId, ToolProviderSpec};
use crate::tools::breaker::{Admission, CircuitBreaker};
use crate::tools::provider::{HealthStatus, ToolProviderClient};

const DEFAULT_PROVIDER_CONCURRENCY: usize = 8;
const DEFAULT_MAX_RETRIES: u32 = 2;

struct ProviderEntry {
    record: Mutex<ToolProvider>,
    breaker: Mutex<CircuitBreaker>,
    client: Arc<dyn ToolProviderClient>,
    concurrency: Arc<Semaphore>,
    fail_count: AtomicU32,
}

/// Mediates calls to every registered [`ToolProvider`] through a uniform
/// interface, enforcing the breaker and a bounded retry policy per provider.
pub struct ToolHub {
    providers: DashMap<String, Arc<ProviderEntry>>,
}

impl Default for ToolHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolHub {
    pub fn new() -> Self {
        ToolHub {
            providers: DashMap::new(),
        }
    }

    pub fn register_provider_with_client(
        &self,
        spec: ToolProviderSpec,
        client: Arc<dyn ToolProviderClient>,
    ) -> ToolProviderId {
        let id = ToolProviderId::from(uuid::Uuid::new_v4().to_string());
        let record = ToolProvider {
            id: id.clone(),
            endpoint: spec.endpoint,
            protocol: spec.protocol,
            auth: spec.auth,
            breaker_state: BreakerState::Closed,
            fail_count: 0,
            tools: spec.tools,
        };
        let entry = Arc::new(ProviderEntry {
            record: Mutex::new(record),
            breaker: Mutex::new(CircuitBreaker::new()),
            client,
            concurrency: Arc::new(Semaphore::new(DEFAULT_PROVIDER_CONCURRENCY)),
            fail_count: AtomicU32::new(0),
        });
        self.providers.insert(id.as_str().to_string(), entry);
        info!(provider_id = %id, "tool provider registered");
        id
    }

    /// `list_tools(provider_id) -> Tool[]`. Returns the cached tools
    /// advertised at registration/last health-check refresh.
    pub fn list_tools(&self, provider_id: &ToolProviderId) -> Result<Vec<Tool>> {
        let entry = self.get(provider_id)?;
        Ok(entry.record.lock().expect("provider record lock").tools.clone())
    }

    /// `health(provider_id) -> {ok, latency_ms}`. Also refreshes the
    /// provider's advertised tool list, per spec §3 ("refreshed on
    /// health-check").
    pub async fn health(&self, provider_id: &ToolProviderId) -> Result<HealthStatus> {
        let entry = self.get(provider_id)?;
        let status = entry.client.health().await?;
        if let Ok(tools) = entry.client.list_tools().await {
            entry.record.lock().expect("provider record lock").tools = tools;
        }
        Ok(status)
    }

    /// `call(provider_id, tool_name, args) -> output`.
    pub async fn call(
        &self,
        provider_id: &ToolProviderId,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let entry = self.get(provider_id)?;

        let admission = {
            let mut breaker = entry.breaker.lock().expect("breaker lock");
            breaker.admit(Instant::now())
        };
        let as_probe = match admission {
            Admission::Denied => {
                warn!(provider_id = %provider_id, "breaker open, denying call without network I/O");
                return Err(CoreError::BreakerOpen(provider_id.to_string()));
            }
            Admission::Proceed { as_probe } => as_probe,
        };

        let _permit = entry
            .concurrency
            .acquire()
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match entry.client.call(tool_name, args.clone()).await {
                Ok(output) => {
                    let mut breaker = entry.breaker.lock().expect("breaker lock");
                    breaker.record_success(as_probe);
                    self.sync_record(&entry, &breaker);
                    return Ok(output);
                }
                Err(err) => {
                    let retriable = err.is_retriable();
                    if retriable && attempt <= DEFAULT_MAX_RETRIES {
                        let delay = Duration::from_millis(50) * 2u32.saturating_pow(attempt - 1);
                        warn!(provider_id = %provider_id, tool_name, attempt, %err, "tool call failed, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let mut breaker = entry.breaker.lock().expect("breaker lock");
                    breaker.record_failure(Instant::now(), as_probe);
                    self.sync_record(&entry, &breaker);
                    entry.fail_count.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }
    }

    fn sync_record(&self, entry: &ProviderEntry, breaker: &CircuitBreaker) {
        let mut record = entry.record.lock().expect("provider record lock");
        record.breaker_state = breaker.state();
        record.fail_count = breaker.fail_count();
    }

    fn get(&self, provider_id: &ToolProviderId) -> Result<Arc<ProviderEntry>> {
        self.providers
            .get(provider_id.as_str())
            .map(|e| e.clone())
            .ok_or_else(|| CoreError::NotFound(format!("tool provider {provider_id}")))
    }
}

/// Constructs a [`ToolProviderSpec`] for a "data-source-backed" provider by
/// synthesizing its tool list from an external-system binding descriptor
/// (spec §4.3). The binding's shape is caller-defined; this only fixes the
/// protocol tag so the hub treats it uniformly after synthesis.
pub fn synthesize_data_source_tools(endpoint: impl Into<String>, tools: Vec<Tool>) -> ToolProviderSpec {
    ToolProviderSpec {
        endpoint: endpoint.into(),
        protocol: Protocol::DataSourceBacked,
        auth: AuthConfig {
            scheme: "none".into(),
            credential_ref: None,
        },
        tools,
    }
}
