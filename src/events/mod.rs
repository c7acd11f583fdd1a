// Event system: typed events, filtered publish/subscribe dispatch, and
// durable persistence for critical events.

pub mod bus;
pub mod persistence;
pub mod subscriber;
pub mod types;

pub use bus::{spawn_publish, BusStats, EventBus, SubscriberId};
pub use persistence::EventLog;
pub use subscriber::{CallbackSubscriber, CollectingSubscriber, EventSubscriber};
pub use types::{event_types, Event, EventCategory, EventFilter, EventPriority};
