// Durable event log trait - grounded on the teacher's `WorkflowStorage`
// async-trait pattern in `engine/storage.rs`.

use async_trait::async_trait;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Event;

/// Append-only, queryable-by-instance event log. In production this is
/// backed by the excluded storage driver; the in-memory implementation here
/// is sufficient for tests and for a single-process deployment.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: Event) -> Result<()>;
    async fn for_instance(&self, instance_id: Uuid) -> Result<Vec<Event>>;
}

#[derive(Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<Event>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        self.events.lock().expect("event log mutex poisoned").push(event);
        Ok(())
    }

    async fn for_instance(&self, instance_id: Uuid) -> Result<Vec<Event>> {
        Ok(self
            .events
            .lock()
            .expect("event log mutex poisoned")
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .cloned()
            .collect())
    }
}
