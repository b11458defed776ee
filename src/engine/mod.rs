// Workflow engine: registry, dispatch, checkpointing, and the run loop
// that drives instances end to end (spec §3, §4.1, §5).

pub mod checkpoint_store;
pub mod dispatch;
pub mod registry;
pub mod workflow_engine;

pub use checkpoint_store::{CheckpointStore, InMemoryCheckpointStore};
pub use dispatch::{dispatch_node, CodeRunner, Compensator, DispatchOutcome, EngineDeps, MockCodeRunner, NoopCompensator};
pub use registry::WorkflowRegistry;
pub use workflow_engine::WorkflowEngine;
