// Event Bus Adapter - carries engine events to a durable log and a
// pub/sub channel, then to live subscribers (spec §4.6).

pub mod bus;
pub mod log;

pub use bus::{EventBus, NoopPubSub, PubSubChannel, PublishRetryPolicy};
pub use log::{EventLog, InMemoryEventLog};
