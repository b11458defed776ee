// Durable checkpoint storage - the engine's source of truth for `resume`
// (spec §4.1). Grounded on the teacher's `ResourceStore`/registry idiom
// (DashMap keyed by id), generalized to the append-then-read-latest access
// pattern a checkpoint needs.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Checkpoint;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn write(&self, checkpoint: Checkpoint) -> Result<()>;
    async fn latest(&self, instance_id: Uuid) -> Result<Option<Checkpoint>>;
}

/// In-memory checkpoint store: only the latest checkpoint per instance is
/// retained, matching the spec's "checkpoint is source of truth" framing
/// rather than an append-only history.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    store: DashMap<Uuid, Checkpoint>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn write(&self, checkpoint: Checkpoint) -> Result<()> {
        self.store.insert(checkpoint.instance_id, checkpoint);
        Ok(())
    }

    async fn latest(&self, instance_id: Uuid) -> Result<Option<Checkpoint>> {
        Ok(self.store.get(&instance_id).map(|c| c.clone()))
    }
}
