// Subscriber capability for the event bus. Handlers are modeled as
// suspending operations; synchronous handlers wrap trivially via
// `CallbackSubscriber`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

use super::{Event, EventFilter};

#[async_trait::async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Stable name used in logs and handler-error reports.
    fn name(&self) -> &str;

    /// A subscriber-owned filter supersedes any filter supplied at
    /// subscription time.
    fn filter(&self) -> Option<EventFilter> {
        None
    }

    async fn handle_event(&self, event: Event) -> Result<()>;
}

// Adapter for plain closures.
pub struct CallbackSubscriber<F>
where
    F: Fn(Event) -> Result<()> + Send + Sync,
{
    name: String,
    callback: F,
}

impl<F> CallbackSubscriber<F>
where
    F: Fn(Event) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

#[async_trait::async_trait]
impl<F> EventSubscriber for CallbackSubscriber<F>
where
    F: Fn(Event) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle_event(&self, event: Event) -> Result<()> {
        (self.callback)(event)
    }
}

/// Test subscriber that records everything it receives, in arrival order.
pub struct CollectingSubscriber {
    name: String,
    filter: Option<EventFilter>,
    received: Arc<Mutex<Vec<Event>>>,
}

impl CollectingSubscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn received(&self) -> Arc<Mutex<Vec<Event>>> {
        Arc::clone(&self.received)
    }
}

#[async_trait::async_trait]
impl EventSubscriber for CollectingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn filter(&self) -> Option<EventFilter> {
        self.filter.clone()
    }

    async fn handle_event(&self, event: Event) -> Result<()> {
        self.received.lock().push(event);
        Ok(())
    }
}
