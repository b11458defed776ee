//! Process configuration, layered `config/default.toml` + `CORE__`-prefixed
//! environment overrides (e.g. `CORE__ENGINE__MAX_CONCURRENT_INSTANCES=128`).
//! Every tunable named across the workflow engine, judgment core, tool hub,
//! and rule deployment specs lives here instead of scattered `env::var` calls.

use serde::Deserialize;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_concurrent_instances: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_concurrent_instances: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_duration_secs: u64,
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 5,
            open_duration_secs: 30,
            half_open_probes: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JudgmentConfig {
    pub cache_ttl_seconds: u64,
    pub weighted_alpha: f64,
    pub escalate_threshold: f64,
}

impl Default for JudgmentConfig {
    fn default() -> Self {
        JudgmentConfig {
            cache_ttl_seconds: 300,
            weighted_alpha: crate::judgment::DEFAULT_WEIGHTED_ALPHA,
            escalate_threshold: crate::judgment::DEFAULT_ESCALATE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub canary_default_percent: u8,
    pub conflict_jaccard_threshold: f64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        DeploymentConfig {
            canary_default_percent: 10,
            conflict_jaccard_threshold: crate::rules::DEFAULT_CONFLICT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 30_000,
        }
    }
}

/// Root config document, built by layering (lowest to highest precedence):
/// compiled-in defaults, `config/default.toml`, `config/{RUN_MODE}.toml`,
/// then `CORE__`-prefixed environment variables with `__` as the nesting
/// separator (so `CORE__ENGINE__MAX_CONCURRENT_INSTANCES` sets
/// `engine.max_concurrent_instances`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub breaker: BreakerConfig,
    pub judgment: JudgmentConfig,
    pub deployment: DeploymentConfig,
    pub retry: RetryConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_run_mode(&std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into()))
    }

    fn load_with_run_mode(run_mode: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("CORE").separator("__"));

        let raw = builder
            .build()
            .map_err(|e| CoreError::InvalidInput(format!("config load failed: {e}")))?;
        raw.try_deserialize()
            .map_err(|e| CoreError::InvalidInput(format!("config deserialize failed: {e}")))
    }
}
