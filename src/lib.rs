//! Workflow orchestration and hybrid rule+LLM judgment core for
//! manufacturing-floor automation.
//!
//! A [`engine::WorkflowEngine`] drives [`models::WorkflowDsl`] graphs through
//! DATA/BI/MCP/ACTION/CODE/JUDGMENT nodes plus control flow (IF_ELSE, SWITCH,
//! CONDITION, PARALLEL, LOOP, WAIT, APPROVAL) and compensation, checkpointing
//! after every node so an instance can resume from a crash or a cooperative
//! cancel. [`judgment::JudgmentEngine`] fuses a [`rules::RulesEngine`]
//! verdict with an LLM judge under a [`models::FusionPolicy`] (rules-only,
//! LLM-only, weighted, escalate-on-disagreement), caching by input digest.
//! [`tools::ToolHub`] mediates every external call through a per-provider
//! [`tools::CircuitBreaker`]. [`learning::Tuner`] turns highly rated
//! [`models::Feedback`] into few-shot [`models::Exemplar`]s on a
//! [`models::PromptTemplate`].
//!
//! This crate has no business logic of its own for any one factory line: it
//! is the generic orchestration substrate a deployment configures with its
//! own workflows, rulesets, tool providers, and prompts.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod judgment;
pub mod learning;
pub mod models;
pub mod rules;
pub mod tools;

pub use engine::{CheckpointStore, EngineDeps, InMemoryCheckpointStore, WorkflowEngine, WorkflowRegistry};
pub use error::{CoreError, Result};
pub use events::{EventBus, EventLog, InMemoryEventLog};
pub use judgment::{JudgmentCache, JudgmentEngine};
pub use learning::{FeedbackStore, PromptStore, Tuner};
pub use rules::{RuleDeploymentHub, RulesEngine};
pub use tools::ToolHub;
