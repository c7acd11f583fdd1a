// # Event Bus
//
// Process-local publish/subscribe dispatcher. Each subscriber owns a
// bounded FIFO mailbox and a dedicated dispatch task, so handlers for one
// subscriber run sequentially in publish order while subscribers proceed
// independently. `publish` never blocks on a slow handler: full mailboxes
// drop their oldest event with a warning.
//
// Suspension points are confined to the persistence append inside
// `publish` and the mailbox waits inside dispatch tasks. No lock is held
// across an await.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;

use super::{Event, EventFilter, EventLog, EventSubscriber};

static GLOBAL_BUS: Lazy<Arc<EventBus>> = Lazy::new(|| Arc::new(EventBus::new()));

const DEFAULT_MAILBOX_CAPACITY: usize = 256;
const DEFAULT_SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

/// Opaque handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Counters exposed by `stats()`.
#[derive(Debug, Clone, Default)]
pub struct BusStats {
    pub events_published: u64,
    pub events_dropped: u64,
    pub events_by_category: HashMap<String, u64>,
    pub subscriber_count: usize,
}

struct Mailbox {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    // Drop-oldest on overflow; returns true when an event was evicted.
    fn push(&self, event: Event) -> bool {
        let mut queue = self.queue.lock();
        let mut dropped = false;
        if queue.len() >= self.capacity {
            queue.pop_front();
            dropped = true;
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
        dropped
    }

    fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

struct SubscriberEntry {
    id: SubscriberId,
    subscriber: Arc<dyn EventSubscriber>,
    filter: Option<EventFilter>,
    mailbox: Arc<Mailbox>,
    task: JoinHandle<()>,
}

pub struct EventBus {
    subscribers: Mutex<Vec<SubscriberEntry>>,
    log: EventLog,
    started: AtomicBool,
    mailbox_capacity: usize,
    shutdown_wait: Duration,
    events_published: AtomicU64,
    events_dropped: AtomicU64,
    by_category: Mutex<HashMap<String, u64>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_settings(
            default_event_log_path(),
            DEFAULT_MAILBOX_CAPACITY,
            DEFAULT_SHUTDOWN_WAIT,
        )
    }

    pub fn with_settings(
        event_log_path: impl Into<PathBuf>,
        mailbox_capacity: usize,
        shutdown_wait: Duration,
    ) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            log: EventLog::new(event_log_path),
            started: AtomicBool::new(false),
            mailbox_capacity: mailbox_capacity.max(1),
            shutdown_wait,
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            by_category: Mutex::new(HashMap::new()),
        }
    }

    // Process-wide shared instance. Prefer explicit injection in new code.
    pub fn global() -> Arc<EventBus> {
        Arc::clone(&GLOBAL_BUS)
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
        info!("Event bus started");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    // Signal shutdown and wait (bounded) for subscriber mailboxes to
    // drain. Subscribers whose mailboxes still hold events at the
    // deadline have their dispatch task aborted and their backlog
    // dropped; a fresh task is spawned so the subscription survives a
    // later start().
    pub async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);

        let mailboxes: Vec<Arc<Mailbox>> = {
            let subscribers = self.subscribers.lock();
            subscribers.iter().map(|s| Arc::clone(&s.mailbox)).collect()
        };

        let deadline = tokio::time::Instant::now() + self.shutdown_wait;
        let mut drained = true;
        loop {
            if mailboxes.iter().all(|m| m.is_empty()) {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                drained = false;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        if !drained {
            let mut subscribers = self.subscribers.lock();
            for entry in subscribers.iter_mut() {
                let backlog = {
                    let mut queue = entry.mailbox.queue.lock();
                    let backlog = queue.len();
                    queue.clear();
                    backlog
                };
                if backlog > 0 {
                    warn!(
                        "Aborting subscriber {} with {} undelivered event(s) after {:?}",
                        entry.subscriber.name(),
                        backlog,
                        self.shutdown_wait
                    );
                    entry.task.abort();
                    entry.task =
                        spawn_dispatch(Arc::clone(&entry.subscriber), Arc::clone(&entry.mailbox));
                }
            }
        }

        info!("Event bus stopped");
    }

    // Register a subscriber with an optional external filter. A filter
    // exposed by the subscriber itself supersedes the external one at
    // dispatch time. Must be called from within a tokio runtime.
    pub fn subscribe(
        &self,
        subscriber: Arc<dyn EventSubscriber>,
        filter: Option<EventFilter>,
    ) -> SubscriberId {
        let id = SubscriberId(Uuid::new_v4());
        let mailbox = Arc::new(Mailbox::new(self.mailbox_capacity));
        let task = spawn_dispatch(Arc::clone(&subscriber), Arc::clone(&mailbox));

        let mut subscribers = self.subscribers.lock();
        subscribers.push(SubscriberEntry {
            id,
            subscriber: Arc::clone(&subscriber),
            filter,
            mailbox,
            task,
        });
        let count = subscribers.len();
        drop(subscribers);

        info!("Subscriber registered: {} ({})", subscriber.name(), count);
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|entry| {
            if entry.id == id {
                entry.task.abort();
                false
            } else {
                true
            }
        });
        let removed = subscribers.len() < before;
        drop(subscribers);

        if removed {
            info!("Subscriber unregistered: {}", id);
        } else {
            warn!("Subscriber not found for unsubscribe: {}", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Publish an event. Non-blocking from the caller's perspective:
    /// handler execution happens on subscriber tasks. Returns `Ok(false)`
    /// (with a warning) when the bus is stopped.
    pub async fn publish(&self, event: Event) -> Result<bool> {
        self.publish_inner(event, true).await
    }

    async fn publish_inner(&self, event: Event, persist: bool) -> Result<bool> {
        if !self.is_started() {
            warn!(
                "Event bus is stopped; dropping event {} from {}",
                event.event_type, event.source_component
            );
            return Ok(false);
        }

        self.events_published.fetch_add(1, Ordering::SeqCst);
        {
            let mut by_category = self.by_category.lock();
            *by_category.entry(event.category.to_string()).or_insert(0) += 1;
        }

        // Durable append happens before dispatch so a crash cannot lose a
        // critical event that subscribers already saw. Persistence errors
        // are logged; dispatch proceeds regardless.
        if persist && event.requires_persistence() {
            if let Err(e) = self.log.append(&event).await {
                error!("Failed to persist event {}: {}", event.event_type, e);
            }
        }

        let targets: Vec<(Arc<dyn EventSubscriber>, Option<EventFilter>, Arc<Mailbox>)> = {
            let subscribers = self.subscribers.lock();
            subscribers
                .iter()
                .map(|s| {
                    (
                        Arc::clone(&s.subscriber),
                        s.filter.clone(),
                        Arc::clone(&s.mailbox),
                    )
                })
                .collect()
        };

        for (subscriber, external_filter, mailbox) in targets {
            let matches = match subscriber.filter().or(external_filter) {
                Some(filter) => filter.matches(&event),
                None => true,
            };
            if !matches {
                continue;
            }
            if mailbox.push(event.clone()) {
                self.events_dropped.fetch_add(1, Ordering::SeqCst);
                warn!(
                    "Mailbox overflow for subscriber {}; dropped oldest event",
                    subscriber.name()
                );
            }
        }

        debug!("Event published: {}", event.event_type);
        Ok(true)
    }

    /// Re-publish every event in the durable log, oldest first. Used on
    /// cold start for recovery. Replayed events are not re-persisted.
    pub async fn replay_persisted_events(&self) -> Result<usize> {
        let events = self.log.read_all().await?;
        let count = events.len();
        for event in events {
            self.publish_inner(event, false).await?;
        }
        info!("Replayed {} persisted event(s)", count);
        Ok(count)
    }

    pub async fn clear_persisted_events(&self) -> Result<bool> {
        self.log.clear().await
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            events_published: self.events_published.load(Ordering::SeqCst),
            events_dropped: self.events_dropped.load(Ordering::SeqCst),
            events_by_category: self.by_category.lock().clone(),
            subscriber_count: self.subscriber_count(),
        }
    }

    // Test-only: drop every subscriber and counter, leaving the bus
    // stopped. The durable log is untouched.
    pub fn reset_for_test(&self) {
        let mut subscribers = self.subscribers.lock();
        for entry in subscribers.drain(..) {
            entry.task.abort();
        }
        drop(subscribers);

        self.started.store(false, Ordering::SeqCst);
        self.events_published.store(0, Ordering::SeqCst);
        self.events_dropped.store(0, Ordering::SeqCst);
        self.by_category.lock().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let subscribers = self.subscribers.get_mut();
        for entry in subscribers.drain(..) {
            entry.task.abort();
        }
    }
}

fn default_event_log_path() -> PathBuf {
    std::env::temp_dir().join(format!("fabric_events_{}.jsonl", std::process::id()))
}

// One dispatch task per subscriber: FIFO consumption, handler failures
// and panics are isolated and logged.
fn spawn_dispatch(subscriber: Arc<dyn EventSubscriber>, mailbox: Arc<Mailbox>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = mailbox.queue.lock().pop_front();
            match event {
                Some(event) => {
                    let event_type = event.event_type.clone();
                    let outcome =
                        std::panic::AssertUnwindSafe(subscriber.handle_event(event))
                            .catch_unwind()
                            .await;
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(
                            "Subscriber {} failed handling {}: {}",
                            subscriber.name(),
                            event_type,
                            e
                        ),
                        Err(_) => error!(
                            "Subscriber {} panicked handling {}",
                            subscriber.name(),
                            event_type
                        ),
                    }
                }
                None => mailbox.notify.notified().await,
            }
        }
    })
}

/// Fire-and-forget publish from synchronous contexts. The event is
/// dropped (with a debug log) when no tokio runtime is available; the bus
/// is never on the critical path for the callers that use this.
pub fn spawn_publish(bus: &Arc<EventBus>, event: Event) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let bus = Arc::clone(bus);
            handle.spawn(async move {
                if let Err(e) = bus.publish(event).await {
                    error!("Background publish failed: {}", e);
                }
            });
        }
        Err(_) => {
            debug!(
                "No async runtime; dropping background event {}",
                event.event_type
            );
        }
    }
}
