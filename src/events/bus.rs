// Event bus - carries engine events to a durable log and a pub/sub channel,
// then to live subscribers. Grounded directly on the teacher's `EventBus`
// in `engine/events.rs` (a `tokio::sync::broadcast` wrapper), extended with
// the durable log and the bounded-retry pub/sub delivery the spec requires.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::events::log::EventLog;
use crate::models::Event;

/// Abstraction over the external pub/sub channel (NATS, Kafka, …) the spec
/// treats as an out-of-scope collaborator. `publish` may fail; the bus
/// retries with bounded backoff and otherwise swallows the failure, per
/// spec §4.6: delivery failures are logged but never fail the engine
/// transition that produced the event.
#[async_trait]
pub trait PubSubChannel: Send + Sync {
    async fn publish(&self, channel_key: &str, event: &Event) -> Result<()>;
}

/// A channel that never fails, used as the default when no external pub/sub
/// is wired up (e.g. tests, or a deployment that only needs the in-process
/// broadcast fanout to live subscribers).
pub struct NoopPubSub;

#[async_trait]
impl PubSubChannel for NoopPubSub {
    async fn publish(&self, _channel_key: &str, _event: &Event) -> Result<()> {
        Ok(())
    }
}

/// Bounded retry policy for pub/sub delivery (spec §4.1: "the publish is
/// retried with bounded backoff").
#[derive(Debug, Clone, Copy)]
pub struct PublishRetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for PublishRetryPolicy {
    fn default() -> Self {
        PublishRetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
        }
    }
}

/// Carries events to (a) a durable in-process log and (b) a pub/sub channel
/// keyed `workflow:{instance_id}:events`, then fans out to live subscribers
/// in emission order per instance.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    log: Arc<dyn EventLog>,
    pubsub: Arc<dyn PubSubChannel>,
    retry_policy: PublishRetryPolicy,
}

impl EventBus {
    pub fn new(log: Arc<dyn EventLog>, pubsub: Arc<dyn PubSubChannel>) -> Self {
        let (sender, _) = broadcast::channel(4096);
        EventBus {
            sender,
            log,
            pubsub,
            retry_policy: PublishRetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: PublishRetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Non-blocking from the engine's perspective: the durable log write and
    /// the broadcast send happen synchronously (in-process, infallible-ish),
    /// but pub/sub delivery is retried in a spawned task so a flaky external
    /// channel never stalls or fails the caller's state transition.
    pub async fn publish(&self, event: Event) -> Result<()> {
        self.log.append(event.clone()).await?;
        let _ = self.sender.send(event.clone());

        let channel_key = crate::models::Event::channel_key(event.instance_id);
        let pubsub = self.pubsub.clone();
        let policy = self.retry_policy;
        tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match pubsub.publish(&channel_key, &event).await {
                    Ok(()) => {
                        debug!(channel = %channel_key, attempt, "event published to pub/sub");
                        return;
                    }
                    Err(err) if attempt < policy.max_attempts => {
                        let delay = policy.initial_delay * 2u32.saturating_pow(attempt - 1);
                        warn!(channel = %channel_key, attempt, %err, "pub/sub publish failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    Err(err) => {
                        warn!(channel = %channel_key, attempt, %err, "pub/sub publish exhausted retries, dropping");
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    /// Multi-consumer subscription to all subsequent events on the bus.
    /// Callers filter by `instance_id` themselves (cheap: the broadcast
    /// channel is shared across instances, matching spec §5's "no
    /// cross-instance ordering is implied" — ordering is only guaranteed
    /// per-instance).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Replays the durable log for one instance — used by `resume` to
    /// re-emit events with `replay=true` without double-advancing state,
    /// and by the CLI `replay` subcommand.
    pub async fn replay(&self, instance_id: Uuid) -> Result<Vec<Event>> {
        let mut events = self.log.for_instance(instance_id).await?;
        for e in &mut events {
            e.replay = true;
        }
        Ok(events)
    }
}
