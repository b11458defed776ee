//! Core error type for the workflow orchestration and judgment core.
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias over
//! [`CoreError`]. The variants below are the error *kinds* named by the
//! workflow engine, judgment core, tool hub, and rule deployment specs; they
//! are intentionally coarse (no per-subsystem error enums) so that callers at
//! the transport layer can map them uniformly.

use thiserror::Error;

/// The single error type returned by every public operation in this crate.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed DSL document or missing required trigger input variables.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A lifecycle precondition was not met (e.g. `start` with no active version).
    #[error("workflow has no active version: {workflow_id}")]
    NotActive { workflow_id: String },

    /// `rollback` targeted a version that does not exist.
    #[error("version not found: workflow={workflow_id} version={version}")]
    VersionNotFound { workflow_id: String, version: u32 },

    /// `resume` was requested on a terminal or non-suspended instance.
    #[error("instance {instance_id} is not resumable in state {state}")]
    NotResumable { instance_id: String, state: String },

    /// A ruleset id did not resolve to any known ruleset.
    #[error("ruleset not found: {0}")]
    RulesetMissing(String),

    /// Rule script source failed to compile.
    #[error("rule compile error: {0}")]
    CompileError(String),

    /// A transient, retryable failure (I/O, upstream 5xx, socket loss).
    #[error("transient error: {0}")]
    Transient(String),

    /// A node- or instance-level deadline was exceeded.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// The provider's circuit breaker is open and denied the call.
    #[error("breaker open for provider {0}")]
    BreakerOpen(String),

    /// Tool input or output disagreed with the advertised schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Credential failure; never retried.
    #[error("auth error: {0}")]
    AuthError(String),

    /// The LLM source could not be reached under the active fusion policy.
    #[error("llm unavailable: {0}")]
    LLMUnavailable(String),

    /// The LLM responded but its output could not be parsed after retries.
    #[error("llm output unparsable: {0}")]
    LLMUnparsable(String),

    /// A node or workflow was not found by id.
    #[error("not found: {0}")]
    NotFound(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for storage / checkpoint-store backends.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// Anything else that does not fit a named kind above.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl CoreError {
    /// Whether this error class is retryable per a node's `retry_on` policy.
    ///
    /// `Transient` and `Timeout` are the only kinds the engine will ever
    /// retry automatically; everything else surfaces immediately per
    /// the propagation rules in the workflow engine spec.
    pub fn is_retriable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::Timeout(_))
    }

    /// A short, stable machine-readable code for `last_error`/`error_code`
    /// surfaced on failed instances.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "InvalidInput",
            CoreError::NotActive { .. } => "NotActive",
            CoreError::VersionNotFound { .. } => "VersionNotFound",
            CoreError::NotResumable { .. } => "NotResumable",
            CoreError::RulesetMissing(_) => "RulesetMissing",
            CoreError::CompileError(_) => "CompileError",
            CoreError::Transient(_) => "Transient",
            CoreError::Timeout(_) => "Timeout",
            CoreError::BreakerOpen(_) => "BreakerOpen",
            CoreError::SchemaMismatch(_) => "SchemaMismatch",
            CoreError::AuthError(_) => "AuthError",
            CoreError::LLMUnavailable(_) => "LLMUnavailable",
            CoreError::LLMUnparsable(_) => "LLMUnparsable",
            CoreError::NotFound(_) => "NotFound",
            CoreError::Serialization(_) => "Serialization",
            CoreError::Storage(_) => "Storage",
            CoreError::Internal(_) => "Internal",
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
