// # Event Types
//
// Typed events for inter-component communication. The serialized form is
// the wire contract used by the persistence file, so field names and value
// shapes here are stable: integer priorities, lowercase categories, and
// ISO-8601 timestamps.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::registry::ComponentId;

/// Well-known event type strings (`category.action`).
pub mod event_types {
    pub const SYSTEM_STARTUP: &str = "system.startup";
    pub const SYSTEM_SHUTDOWN: &str = "system.shutdown";
    pub const COMPONENT_REGISTERED: &str = "system.component.registered";
    pub const COMPONENT_UNREGISTERED: &str = "system.component.unregistered";
    pub const COMPONENT_ERROR: &str = "system.component.error";
    pub const INTEGRATION_ERROR: &str = "system.integration.error";
    pub const STATUS_CHANGE: &str = "system.status.change";
    pub const INTERFACE_REGISTERED: &str = "interface.registered";

    pub const CONTENT_CREATED: &str = "content.created";
    pub const CONTENT_UPDATED: &str = "content.updated";
    pub const CONTENT_DELETED: &str = "content.deleted";
    pub const CONTENT_INDEXED: &str = "content.indexed";

    pub const USER_LOGGED_IN: &str = "user.logged_in";
    pub const USER_LOGGED_OUT: &str = "user.logged_out";

    pub const AI_QUERY_PROCESSED: &str = "ai.query.processed";
}

/// Category grouping for related events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    System,
    Content,
    User,
    Ai,
    Ui,
    Storage,
    Auth,
    Integration,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventCategory::System => "system",
            EventCategory::Content => "content",
            EventCategory::User => "user",
            EventCategory::Ai => "ai",
            EventCategory::Ui => "ui",
            EventCategory::Storage => "storage",
            EventCategory::Auth => "auth",
            EventCategory::Integration => "integration",
        };
        write!(f, "{}", name)
    }
}

/// Priority levels, serialized as integers 0-3 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum EventPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Serialize for EventPriority {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for EventPriority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(EventPriority::Low),
            1 => Ok(EventPriority::Normal),
            2 => Ok(EventPriority::High),
            3 => Ok(EventPriority::Critical),
            other => Err(serde::de::Error::custom(format!(
                "invalid event priority: {}",
                other
            ))),
        }
    }
}

/// An event published on the bus. Immutable after publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: String,
    pub category: EventCategory,
    pub source_component: ComponentId,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub priority: EventPriority,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_persistent: bool,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        category: EventCategory,
        source_component: impl Into<ComponentId>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            category,
            source_component: source_component.into(),
            data: HashMap::new(),
            priority: EventPriority::Normal,
            timestamp: Utc::now(),
            is_persistent: false,
        }
    }

    pub fn with_data(mut self, data: HashMap<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_data_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.is_persistent = true;
        self
    }

    /// Persistent events and critical-priority events both go to the
    /// durable file.
    pub fn requires_persistence(&self) -> bool {
        self.is_persistent || self.priority == EventPriority::Critical
    }
}

/// Restricts which events reach a subscriber. Absent facets match all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_types: Option<Vec<String>>,
    pub categories: Option<Vec<EventCategory>>,
    pub min_priority: Option<EventPriority>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = EventCategory>) -> Self {
        self.categories = Some(categories.into_iter().collect());
        self
    }

    pub fn with_min_priority(mut self, priority: EventPriority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// True iff every specified facet matches the event.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(types) = &self.event_types {
            if !types.iter().any(|t| t == &event.event_type) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !categories.contains(&event.category) {
                return false;
            }
        }
        if let Some(min) = self.min_priority {
            if event.priority < min {
                return false;
            }
        }
        true
    }
}
